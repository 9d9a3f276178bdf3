//! The server supervisor (§4.8): binds every configured listener, runs one
//! accept loop per listener, and tracks every accepted connection so a
//! graceful shutdown can wait for them to finish.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use oscar_core::config::{ListenerConfig, ServerConfig};
use oscar_types::ErrorKind;

use crate::connection::{handle_connection, Collaborators};

/// A bound-but-not-yet-running server: configuration plus the collaborators
/// every connection on it will share.
pub struct Server {
    config: ServerConfig,
    collaborators: Arc<Collaborators>,
}

impl Server {
    pub fn new(config: ServerConfig, collaborators: Arc<Collaborators>) -> Self {
        Self { config, collaborators }
    }

    /// Bind every listener in `config.listeners`. On the first bind failure,
    /// every listener already opened is dropped (closing its socket) and the
    /// error is returned (§4.8).
    pub async fn listen_and_serve(self) -> Result<ServerHandle, ErrorKind> {
        let mut listeners = Vec::with_capacity(self.config.listeners.len());
        for listener_config in &self.config.listeners {
            match TcpListener::bind(listener_config.bos_listen_address.as_str()).await {
                Ok(listener) => {
                    info!("bound listener on {}", listener_config.bos_listen_address);
                    listeners.push((listener, listener_config.clone()));
                }
                Err(err) => {
                    error!("failed to bind {}: {err}", listener_config.bos_listen_address);
                    return Err(ErrorKind::IoError(err));
                }
            }
        }

        let shutdown = CancellationToken::new();
        let collaborators = self.collaborators;
        let driver_shutdown = shutdown.clone();

        let driver = tokio::spawn(async move {
            let mut accept_loops = JoinSet::new();
            for (listener, listener_config) in listeners {
                let collaborators = collaborators.clone();
                let shutdown = driver_shutdown.clone();
                accept_loops.spawn(run_accept_loop(listener, listener_config, collaborators, shutdown));
            }
            while accept_loops.join_next().await.is_some() {}
        });

        Ok(ServerHandle { shutdown, driver })
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    listener_config: ListenerConfig,
    collaborators: Arc<Collaborators>,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, remote_addr)) => {
                        let collaborators = collaborators.clone();
                        let shutdown = shutdown.clone();
                        let advertised_host = listener_config.advertised_host(false).to_string();
                        connections.spawn(async move {
                            let (read, write) = socket.into_split();
                            handle_connection(read, write, remote_addr, &advertised_host, collaborators.as_ref(), shutdown).await;
                        });
                    }
                    Err(err) => {
                        error!("accept failed on {}: {err}", listener_config.bos_listen_address);
                    }
                }
            }
        }
    }

    info!("listener on {} shutting down, draining connections", listener_config.bos_listen_address);
    while connections.join_next().await.is_some() {}
}

/// A handle to a running server: lets a caller request graceful or
/// immediate shutdown.
pub struct ServerHandle {
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
}

impl ServerHandle {
    /// Signal shutdown to every in-flight connection and accept loop, close
    /// all listeners, and wait up to `deadline` for everything to finish.
    /// If the deadline elapses first, logs and returns anyway — this never
    /// force-closes an active socket beyond listener closure (§4.8).
    pub async fn shutdown(self, deadline: Duration) {
        self.shutdown.cancel();
        match tokio::time::timeout(deadline, self.driver).await {
            Ok(Ok(())) => info!("server shut down cleanly"),
            Ok(Err(join_err)) => error!("server driver task panicked: {join_err}"),
            Err(_) => warn!("shutdown deadline of {deadline:?} elapsed; some connections may still be finishing"),
        }
    }

    /// Signal shutdown without waiting for it to complete.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }
}
