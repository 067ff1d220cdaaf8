pub mod config;
pub mod handlers;
pub mod state;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use broker::{Broker, ProblemStore};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerAppConfig;
use crate::state::AppState;

/// Bound listeners plus the broker they feed.
pub struct Server {
    state: AppState,
    workers: TcpListener,
    clients: TcpListener,
}

impl Server {
    pub async fn bind(config: &ServerAppConfig) -> io::Result<Self> {
        let problems = ProblemStore::new(config.problem_roots());
        info!(roots = ?problems.roots(), "Problem search path");

        let broker = Arc::new(Broker::new((&config.broker).into(), Arc::new(problems)));
        let state = AppState {
            broker,
            max_frame_bytes: config.link.max_frame_bytes,
        };

        let workers = TcpListener::bind(&config.server.worker_addr).await?;
        let clients = TcpListener::bind(&config.server.submit_addr).await?;
        Ok(Self {
            state,
            workers,
            clients,
        })
    }

    pub fn worker_addr(&self) -> io::Result<SocketAddr> {
        self.workers.local_addr()
    }

    pub fn submit_addr(&self) -> io::Result<SocketAddr> {
        self.clients.local_addr()
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.state.broker.clone()
    }

    /// Accept workers and clients until the broker is shut down.
    pub async fn serve(self) {
        info!(
            worker_addr = ?self.workers.local_addr().ok(),
            submit_addr = ?self.clients.local_addr().ok(),
            "Broker listening"
        );
        tokio::join!(
            handlers::worker::accept_workers(self.state.clone(), self.workers),
            handlers::submission::accept_clients(self.state.clone(), self.clients),
        );
    }
}
