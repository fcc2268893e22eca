//! Local HTTP + WebSocket API.
//!
//! Binds loopback only. Each accepted socket gets its own task; plain
//! requests are answered and closed, `/api/live` upgrades stay open and push
//! metrics snapshots on a timer.

pub mod connection;
pub mod discovery;
pub mod http;
pub mod routes;
pub mod websocket;

pub use discovery::{DiscoveryFile, DiscoveryRecord};
pub use routes::ApiState;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Bind `127.0.0.1` on the first free port of `start .. start + attempts`.
pub async fn bind_with_retry(start: u16, attempts: u16) -> Result<TcpListener> {
    let end = (start as u32 + attempts as u32).min(u16::MAX as u32 + 1);

    for port in start as u32..end {
        let addr = SocketAddr::from((HOST, port as u16));
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::debug!(port, error = %e, "Port unavailable"),
        }
    }

    Err(Error::PortExhausted {
        start,
        end,
        attempts,
    })
}

/// A running API server. Dropping it stops accepting and removes the
/// discovery record.
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    discovery: Option<DiscoveryFile>,
}

impl ApiServer {
    /// Bind, write the discovery record, and start accepting.
    ///
    /// A discovery write failure is logged and the server keeps running.
    pub async fn start(config: &ServerConfig, state: ApiState) -> Result<Self> {
        let listener = match bind_with_retry(config.port, config.max_port_attempts).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "API server not started");
                return Err(e);
            }
        };
        let addr = listener.local_addr()?;

        let record = DiscoveryRecord::current(&HOST.to_string(), addr.port());
        let discovery = match DiscoveryFile::write(config.discovery_path(), record) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to write discovery record");
                None
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::new(state), shutdown_rx));

        tracing::info!(addr = %addr, "API server listening");
        Ok(Self {
            addr,
            shutdown,
            accept_task: Some(accept_task),
            discovery,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn discovery_path(&self) -> Option<&Path> {
        self.discovery.as_ref().map(DiscoveryFile::path)
    }

    /// Stop accepting, close live connections and remove the discovery record.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        if let Some(mut discovery) = self.discovery.take() {
            discovery.remove();
        }
        tracing::info!(addr = %self.addr, "API server stopped");
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle(stream, state, shutdown).await {
                            tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
