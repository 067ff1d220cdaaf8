use async_trait::async_trait;
use common::{JsonLines, ToWorker};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::BrokerError;

/// Broker side of a persistent worker connection.
#[async_trait]
pub trait WorkerLink: Send {
    async fn send(&mut self, msg: &ToWorker) -> Result<(), BrokerError>;
    /// Next string message from the worker.
    async fn recv(&mut self) -> Result<String, BrokerError>;
    async fn close(&mut self);
}

#[async_trait]
impl<S> WorkerLink for JsonLines<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: &ToWorker) -> Result<(), BrokerError> {
        Ok(JsonLines::send(self, msg).await?)
    }

    async fn recv(&mut self) -> Result<String, BrokerError> {
        Ok(JsonLines::recv::<String>(self).await?)
    }

    async fn close(&mut self) {
        if let Err(e) = JsonLines::close(self).await {
            debug!(error = %e, "Error closing worker link");
        }
    }
}
