//! Stratum v1 server for downstream miners.
//!
//! The [`Server`] owns the listening socket and a registry of live
//! [`ClientConnection`]s. Every accepted socket gets a pool-unique
//! `extranonce1` so no two miners grind the same nonce space, and runs its own
//! receive loop on a separate task.
pub mod connection;
pub mod handlers;
pub mod message;

pub use connection::{ClientConnection, MinerIdentity, CALL_TIMEOUT};
pub use message::{Message, MessageKind, ReplyError};

use crate::config::StratumServerConfig;
use crate::error::StratumErrors;
use crate::sharechain::WorkSource;
use crate::target::{target_to_difficulty, Target};
use crate::EXTRANONCE1_SIZE;
use futures::lock::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Draws random prefixes until one is not `is_taken`.
///
/// Callers must hold the registry lock for the whole call so a concurrent
/// registration cannot claim the same prefix in between.
pub fn allocate_extranonce1<R: RngCore + ?Sized>(
    rng: &mut R,
    is_taken: impl Fn(&[u8; EXTRANONCE1_SIZE]) -> bool,
) -> [u8; EXTRANONCE1_SIZE] {
    loop {
        let mut candidate = [0u8; EXTRANONCE1_SIZE];
        rng.fill_bytes(&mut candidate);
        if !is_taken(&candidate) {
            return candidate;
        }
        log::debug!("extranonce1 {} already in use, drawing again", hex::encode(candidate));
    }
}

/// Represents the Stratum server instance, which maintains configuration,
/// the pool difficulty and the registry of downstream connections.
pub struct Server {
    config: StratumServerConfig,
    difficulty: RwLock<f64>,
    connections: Mutex<Vec<Arc<ClientConnection>>>,
    // Source of extranonce1 prefixes, only locked under `connections`.
    rng: Mutex<Box<dyn RngCore + Send>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

impl Server {
    /// Creates a server whose difficulty is derived from the share chain's
    /// current target. Nothing is bound until [`accept`](Self::accept).
    pub fn new<S: WorkSource + ?Sized>(config: StratumServerConfig, share_chain: &S) -> Self {
        Self::with_rng(config, share_chain, StdRng::from_entropy())
    }

    /// Same as [`new`](Self::new) but drawing `extranonce1` prefixes from `rng`.
    pub fn with_rng<S, R>(config: StratumServerConfig, share_chain: &S, rng: R) -> Self
    where
        S: WorkSource + ?Sized,
        R: RngCore + Send + 'static,
    {
        let target = share_chain.target();
        let difficulty = target_to_difficulty(&target);
        log::info!(
            "Initializing stratum server with config: {:?}, target {} (difficulty {})",
            config,
            target,
            difficulty
        );
        Server {
            config,
            difficulty: RwLock::new(difficulty),
            connections: Mutex::new(Vec::new()),
            rng: Mutex::new(Box::new(rng)),
            local_addr: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &StratumServerConfig {
        &self.config
    }

    pub async fn difficulty(&self) -> f64 {
        *self.difficulty.read().await
    }

    /// Address the listener is bound to, once [`accept`](Self::accept) has bound it.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Snapshot of the live connections in registration order.
    pub async fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.lock().await.clone()
    }

    /// Binds the configured address and serves connections until
    /// [`close`](Self::close) is called or the listener fails.
    ///
    /// # Returns
    /// * `Ok(())` – the server was closed.
    /// * `Err(StratumErrors::BindFailed)` – the address could not be bound.
    /// * `Err(StratumErrors::AcceptFailed)` – the listener broke after binding.
    pub async fn accept(self: Arc<Self>) -> Result<(), StratumErrors> {
        let bind_address = self.config.bind_address();
        let listener = match TcpListener::bind(&bind_address).await {
            Ok(listener) => listener,
            Err(error) => {
                log::error!("Failed to bind to {}: {}", bind_address, error);
                return Err(StratumErrors::BindFailed {
                    address: bind_address,
                    error,
                });
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|error| StratumErrors::AcceptFailed { error })?;
        *self.local_addr.lock().await = Some(local_addr);
        self.connections.lock().await.clear();
        log::info!("Listening for incoming stratum connections on {}", local_addr);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    log::info!("Stratum listener on {} closed", local_addr);
                    return Ok(());
                }
                event = listener.accept() => {
                    match event {
                        Ok((stream, peer_addr)) => {
                            let (reader, writer) = stream.into_split();
                            self.admit(reader, writer, peer_addr).await;
                        }
                        Err(error) => {
                            log::error!("Accepting on {} failed: {}", local_addr, error);
                            return Err(StratumErrors::AcceptFailed { error });
                        }
                    }
                }
            }
        }
    }

    /// Registers a freshly accepted stream and starts its receive loop.
    ///
    /// The connection gets a unique `extranonce1` under the registry lock. If
    /// the registry is already full the connection is closed right away and
    /// `None` is returned; existing sessions are unaffected.
    pub async fn admit<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
        peer_addr: SocketAddr,
    ) -> Option<Arc<ClientConnection>>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut connections = self.connections.lock().await;
        let extranonce1 = {
            let mut rng = self.rng.lock().await;
            allocate_extranonce1(&mut **rng, |candidate| {
                connections
                    .iter()
                    .any(|connection| connection.extranonce1() == candidate)
            })
        };
        let connection = Arc::new(ClientConnection::new(
            Arc::downgrade(self),
            reader,
            writer,
            extranonce1,
            peer_addr,
        ));
        if connections.len() >= self.config.max_connections {
            drop(connections);
            log::error!(
                "Maximum number of client connections reached ({}), dropping connection request from {}",
                self.config.max_connections,
                peer_addr
            );
            connection.close().await;
            return None;
        }
        connections.push(connection.clone());
        drop(connections);

        log::info!(
            "Connection established from {} with extranonce1 {}",
            peer_addr,
            connection.extranonce1_hex()
        );
        tokio::spawn(connection.clone().listen());
        Some(connection)
    }

    pub(crate) async fn deregister(&self, connection: &Arc<ClientConnection>) {
        let mut connections = self.connections.lock().await;
        connections.retain(|registered| !Arc::ptr_eq(registered, connection));
        log::debug!(
            "Removed {} from the registry, {} connections left",
            connection.peer_addr(),
            connections.len()
        );
    }

    /// Re-derives the pool difficulty from a new share chain target and pushes
    /// it to every authorized miner. Pushing only queues the notification, so
    /// a miner that stopped reading does not hold up the others.
    pub async fn update_target(&self, target: &Target) {
        let difficulty = target_to_difficulty(target);
        *self.difficulty.write().await = difficulty;
        log::info!("Pool difficulty updated to {} (target {})", difficulty, target);
        for connection in self.connections().await {
            if !connection.is_authorized().await {
                continue;
            }
            if let Err(error) = connection.send_difficulty(difficulty).await {
                log::error!(
                    "Sending difficulty to {} failed: {}",
                    connection.peer_addr(),
                    error
                );
            }
        }
    }

    /// Stops the accept loop and releases the listener. Live miners are only
    /// disconnected when `close_clients_on_shutdown` is configured.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if self.config.close_clients_on_shutdown {
            let connections: Vec<Arc<ClientConnection>> =
                self.connections.lock().await.drain(..).collect();
            for connection in connections {
                connection.close().await;
            }
        }
    }
}
