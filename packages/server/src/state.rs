use std::sync::Arc;

use broker::Broker;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub max_frame_bytes: usize,
}
