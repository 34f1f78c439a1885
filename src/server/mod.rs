//! Server module
//!
//! Handles TCP connections and manages the event loop.
//! This module is responsible for accepting connections and handing each
//! one a [`Session`] over the shared key space.

mod connection;

use crate::commands::CommandRegistry;
use crate::config::ServiceOptions;
use crate::dispatch::Session;
use crate::executor::Coordinator;
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

pub use connection::Connection;

/// State shared by every connection of one server
#[derive(Clone)]
pub struct Shared {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<CommandRegistry>,
}

impl Shared {
    pub fn new(databases: usize) -> Self {
        Shared {
            coordinator: Arc::new(Coordinator::new(databases)),
            registry: Arc::new(CommandRegistry::new()),
        }
    }

    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.coordinator), Arc::clone(&self.registry))
    }
}

/// Accept connections on `listener` until `shutdown` resolves.
///
/// On shutdown every blocked command is released and the connection tasks
/// are aborted.
pub async fn serve(
    listener: TcpListener,
    shared: Shared,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (socket, peer) = accepted.context("failed to accept connection")?;
                info!("New RESP connection from {}", peer);

                let session = shared.session();
                connections.spawn(async move {
                    let mut connection = Connection::new(socket);
                    if let Err(e) = connection.handle(session).await {
                        error!("Connection error from {}: {:#}", peer, e);
                    }
                    info!("Connection closed: {}", peer);
                });
            }
            // Reap finished connection tasks so the set does not grow
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!("Shutting down, closing {} connections", connections.len());
    shared.coordinator.shutdown();
    connections.shutdown().await;
    Ok(())
}

/// A server running on a background task
///
/// Binding port 0 picks a free port; [`addr`](MockServer::addr) reports the
/// one actually bound.
pub struct MockServer {
    addr: SocketAddr,
    shared: Shared,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl MockServer {
    pub async fn start(options: &ServiceOptions) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&options.bind_address)
            .await
            .with_context(|| format!("failed to bind {}", options.bind_address))?;
        let addr = listener.local_addr().context("failed to read bound address")?;
        info!("redmock RESP server listening on {}", addr);

        let shared = Shared::new(options.databases);
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, shared.clone(), async move {
            let _ = rx.await;
        }));

        Ok(MockServer {
            addr,
            shared,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The key space behind this server
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.shared.coordinator
    }

    /// Stop accepting, release blocked clients and wait for the accept loop
    pub async fn stop(mut self) -> anyhow::Result<()> {
        self.signal_shutdown();
        match self.task.take() {
            Some(task) => task.await.context("server task panicked")?,
            None => Ok(()),
        }
    }

    fn signal_shutdown(&mut self) {
        self.shared.coordinator.shutdown();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
