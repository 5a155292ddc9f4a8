use super::message::{Message, MessageKind, ReplyError};
use super::Server;
use crate::error::StratumErrors;
use crate::EXTRANONCE1_SIZE;
use futures::lock::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

/// How long an outbound [`ClientConnection::call`] waits for its response.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest line accepted from a miner before the connection is dropped.
pub const MAX_LINE_LENGTH: usize = 2_usize.pow(16);
/// Frames waiting for the write loop. A miner that lets this fill up is not
/// reading and gets disconnected.
pub const OUTBOUND_QUEUE_DEPTH: usize = 1024;

/// Invoked at most once when the connection becomes unusable because of an
/// I/O or decode failure.
pub type ErrorCallback = Box<dyn FnOnce(&StratumErrors) + Send>;
/// Receives the `params` of an inbound notification.
pub type NotificationHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingCall = oneshot::Sender<Result<Value, StratumErrors>>;

enum Outbound {
    Frame(Vec<u8>),
    /// Acknowledged once every frame queued before it has been written.
    Flush(oneshot::Sender<()>),
}

/// Identity a miner authorized with, `address[.worker]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerIdentity {
    pub payout_address: String,
    pub worker: Option<String>,
}

impl MinerIdentity {
    pub fn parse(user: &str) -> Self {
        match user.split_once('.') {
            Some((payout_address, worker)) => MinerIdentity {
                payout_address: payout_address.to_string(),
                worker: Some(worker.to_string()),
            },
            None => MinerIdentity {
                payout_address: user.to_string(),
                worker: None,
            },
        }
    }
}

/// One live miner session.
///
/// The connection owns its socket halves; closing it releases both and fails
/// every call still waiting for a response. Outbound frames go through a
/// queue drained by a single write loop, so concurrent `call`/`notify`/`reply`
/// never interleave and never wait on the socket themselves.
pub struct ClientConnection {
    server: Weak<Server>,
    peer_addr: SocketAddr,
    extranonce1: [u8; EXTRANONCE1_SIZE],

    reader: Mutex<Option<BoxedReader>>,
    // Both handed to the write loop when `listen` starts.
    writer: Mutex<Option<BoxedWriter>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    outbound_tx: mpsc::Sender<Outbound>,

    seq: AtomicU64,
    pending_calls: Mutex<HashMap<u64, PendingCall>>,

    error_callback: Mutex<Option<ErrorCallback>>,
    notification_handlers: Mutex<HashMap<String, NotificationHandler>>,

    miner_version: RwLock<Option<String>>,
    identity: RwLock<Option<MinerIdentity>>,

    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl ClientConnection {
    pub fn new<R, W>(
        server: Weak<Server>,
        reader: R,
        writer: W,
        extranonce1: [u8; EXTRANONCE1_SIZE],
        peer_addr: SocketAddr,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        ClientConnection {
            server,
            peer_addr,
            extranonce1,
            reader: Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            outbound_tx,
            seq: AtomicU64::new(0),
            pending_calls: Mutex::new(HashMap::new()),
            error_callback: Mutex::new(None),
            notification_handlers: Mutex::new(HashMap::new()),
            miner_version: RwLock::new(None),
            identity: RwLock::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn extranonce1(&self) -> &[u8; EXTRANONCE1_SIZE] {
        &self.extranonce1
    }

    pub fn extranonce1_hex(&self) -> String {
        hex::encode(self.extranonce1)
    }

    pub(crate) fn server(&self) -> Option<Arc<Server>> {
        self.server.upgrade()
    }

    pub async fn miner_version(&self) -> Option<String> {
        self.miner_version.read().await.clone()
    }

    pub(crate) async fn set_miner_version(&self, version: String) {
        *self.miner_version.write().await = Some(version);
    }

    pub async fn identity(&self) -> Option<MinerIdentity> {
        self.identity.read().await.clone()
    }

    pub(crate) async fn set_identity(&self, identity: MinerIdentity) {
        *self.identity.write().await = Some(identity);
    }

    pub async fn is_authorized(&self) -> bool {
        self.identity.read().await.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn set_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock().await = Some(callback);
    }

    /// Registers a handler for inbound notifications named `method`. Should be
    /// set before [`listen`](Self::listen) starts to not miss early frames.
    pub async fn set_notification_handler(&self, method: &str, handler: NotificationHandler) {
        self.notification_handlers
            .lock()
            .await
            .insert(method.to_string(), handler);
    }

    /// Releases the socket and fails all pending calls. Idempotent.
    ///
    /// Never waits on the socket: a write loop stuck on a miner that stopped
    /// reading is cancelled rather than drained. Frames still queued are
    /// dropped.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("Closing stratum connection with {}", self.peer_addr);
        self.shutdown.cancel();
        let pending: Vec<PendingCall> = self
            .pending_calls
            .lock()
            .await
            .drain()
            .map(|(_, pending_call)| pending_call)
            .collect();
        for pending_call in pending {
            let _ = pending_call.send(Err(StratumErrors::ConnectionClosed));
        }
        // Only still here when `listen` never started, otherwise the write
        // loop owns it and shuts it down on cancellation.
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        self.outbound_rx.lock().await.take();
        self.reader.lock().await.take();
    }

    async fn dispatch_error(&self, error: StratumErrors) {
        let callback = self.error_callback.lock().await.take();
        if let Some(callback) = callback {
            callback(&error);
        }
    }

    /// Reads frames until an I/O or decode error, EOF, or a local close.
    ///
    /// Frames are dispatched strictly in arrival order. Outbound frames are
    /// written by a companion task started here. When the loop ends the
    /// connection is closed and removed from the server registry.
    pub async fn listen(self: Arc<Self>) {
        let reader = match self.reader.lock().await.take() {
            Some(reader) => reader,
            None => return,
        };
        let writer = self.writer.lock().await.take();
        let outbound = self.outbound_rx.lock().await.take();
        if let (Some(writer), Some(outbound)) = (writer, outbound) {
            tokio::spawn(self.clone().write_loop(writer, outbound));
        }
        let mut framed = FramedRead::new(
            BufReader::new(reader),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        );
        log::info!("Handling new connection from {}", self.peer_addr);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                line = framed.next() => {
                    match line {
                        Some(Ok(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            log::debug!("Read line {:?} from {}", line, self.peer_addr);
                            match Message::decode(line.as_bytes()) {
                                Ok(message) => self.dispatch(message).await,
                                Err(error) => {
                                    log::error!("Failed to parse message from {}: {}", self.peer_addr, error);
                                    self.dispatch_error(error).await;
                                    self.close().await;
                                    break;
                                }
                            }
                        }
                        Some(Err(error)) => {
                            log::error!("Error reading line from {}: {}", self.peer_addr, error);
                            self.dispatch_error(StratumErrors::UnableToReadStream { error }).await;
                            self.close().await;
                            break;
                        }
                        None => {
                            log::info!("Connection closed by client: {}", self.peer_addr);
                            self.dispatch_error(StratumErrors::ConnectionClosed).await;
                            self.close().await;
                            break;
                        }
                    }
                }
            }
        }
        if let Some(server) = self.server() {
            server.deregister(&self).await;
        }
    }

    async fn dispatch(&self, message: Message) {
        match message.kind() {
            MessageKind::Response => self.deliver_response(message).await,
            MessageKind::Notification => self.dispatch_notification(message).await,
            MessageKind::Request => {
                let method = message.method.clone().unwrap_or_default();
                let handler = self.notification_handlers.lock().await.get(&method).cloned();
                match handler {
                    Some(handler) => handler(message.params.unwrap_or_default()),
                    None => self.handle_request(message).await,
                }
            }
        }
    }

    async fn deliver_response(&self, message: Message) {
        let id = message.id();
        let pending_call = self.pending_calls.lock().await.remove(&id);
        let pending_call = match pending_call {
            Some(pending_call) => pending_call,
            None => {
                log::debug!(
                    "Discarding response {} from {} without a pending call",
                    id,
                    self.peer_addr
                );
                return;
            }
        };
        let result = match message.error_message() {
            Some(message) => Err(StratumErrors::CallFailed { message }),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        let _ = pending_call.send(result);
    }

    async fn dispatch_notification(&self, message: Message) {
        let method = message.method.unwrap_or_default();
        let handler = self.notification_handlers.lock().await.get(&method).cloned();
        match handler {
            Some(handler) => handler(message.params.unwrap_or_default()),
            None => log::debug!(
                "Ignoring notification {} from {} without a handler",
                method,
                self.peer_addr
            ),
        }
    }

    async fn handle_request(&self, request: Message) {
        let method = request.method.as_deref().unwrap_or_default();
        let id = request.id();
        match method {
            "mining.subscribe" => self.handle_subscribe(id, request.params()).await,
            "mining.authorize" => self.handle_authorize(id, request.params()).await,
            method => {
                let error = StratumErrors::InvalidMethod {
                    method: method.to_string(),
                };
                log::debug!("{} called by {}: {:?}", error, self.peer_addr, request);
            }
        }
    }

    /// Drains the outbound queue onto the socket until the connection is
    /// closed or a write fails. A failed write closes the connection.
    async fn write_loop(
        self: Arc<Self>,
        mut writer: BoxedWriter,
        mut outbound: mpsc::Receiver<Outbound>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = outbound.recv() => next,
            };
            let frame = match next {
                Some(Outbound::Frame(frame)) => frame,
                Some(Outbound::Flush(done)) => {
                    let _ = done.send(());
                    continue;
                }
                None => break,
            };
            let write_res = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                write_res = write_frame(&mut writer, &frame) => write_res,
            };
            if let Err(error) = write_res {
                log::error!("An error occurred while writing to {} - {}", self.peer_addr, error);
                self.dispatch_error(StratumErrors::UnableToWriteStream { error })
                    .await;
                self.close().await;
                break;
            }
        }
        let _ = writer.shutdown().await;
        log::debug!("Write loop for {} stopped", self.peer_addr);
    }

    /// Queues one frame for the write loop without waiting on the socket.
    ///
    /// A full queue means the miner stopped reading; the connection is closed
    /// rather than letting the backlog grow.
    async fn write_message(&self, message: &Message) -> Result<(), StratumErrors> {
        if self.is_closed() {
            return Err(StratumErrors::ConnectionClosed);
        }
        let frame = message.encode()?;
        match self.outbound_tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::error!(
                    "Outbound queue to {} is full ({} frames), disconnecting",
                    self.peer_addr,
                    OUTBOUND_QUEUE_DEPTH
                );
                self.dispatch_error(StratumErrors::OutboundQueueFull {
                    depth: OUTBOUND_QUEUE_DEPTH,
                })
                .await;
                self.close().await;
                Err(StratumErrors::OutboundQueueFull {
                    depth: OUTBOUND_QUEUE_DEPTH,
                })
            }
            Err(TrySendError::Closed(_)) => Err(StratumErrors::ConnectionClosed),
        }
    }

    /// Waits until every frame queued so far has been written. Fails with
    /// [`StratumErrors::ConnectionClosed`] when the connection goes away first.
    pub async fn flush(&self) -> Result<(), StratumErrors> {
        let (done_tx, done_rx) = oneshot::channel();
        self.outbound_tx
            .send(Outbound::Flush(done_tx))
            .await
            .map_err(|_| StratumErrors::ConnectionClosed)?;
        done_rx.await.map_err(|_| StratumErrors::ConnectionClosed)
    }

    /// Invokes `method` on the miner and waits for its correlated response.
    ///
    /// Fails with [`StratumErrors::CallTimeout`] after [`CALL_TIMEOUT`], with
    /// [`StratumErrors::CallFailed`] when the miner answers with an error, and
    /// with [`StratumErrors::ConnectionClosed`] when the connection goes away
    /// first. The timeout starts once the request is queued, so a miner that
    /// stopped reading times out like one that never answers.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, StratumErrors> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (response_sender, mut response_receiver) = oneshot::channel();
        {
            let mut pending_calls = self.pending_calls.lock().await;
            if self.is_closed() {
                return Err(StratumErrors::ConnectionClosed);
            }
            pending_calls.insert(id, response_sender);
        }
        if let Err(error) = self.write_message(&Message::request(id, method, params)).await {
            self.pending_calls.lock().await.remove(&id);
            return Err(error);
        }
        tokio::select! {
            response = &mut response_receiver => {
                response.unwrap_or(Err(StratumErrors::ConnectionClosed))
            }
            _ = tokio::time::sleep(CALL_TIMEOUT) => {
                // Whoever removes the pending entry first owns the outcome.
                if self.pending_calls.lock().await.remove(&id).is_some() {
                    log::debug!("Call {} ({}) to {} timed out", id, method, self.peer_addr);
                    Err(StratumErrors::CallTimeout { method: method.to_string(), id })
                } else {
                    response_receiver.await.unwrap_or(Err(StratumErrors::ConnectionClosed))
                }
            }
        }
    }

    /// Sends a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), StratumErrors> {
        self.write_message(&Message::notification(method, params))
            .await
    }

    /// Answers the inbound request `id` with either a result or an error.
    pub async fn reply(
        &self,
        id: u64,
        outcome: Result<Value, ReplyError>,
    ) -> Result<(), StratumErrors> {
        let response = match outcome {
            Ok(result) => Message::response(id, result),
            Err(error) => Message::error_response(id, &error),
        };
        self.write_message(&response).await
    }

    pub async fn pending_call_count(&self) -> usize {
        self.pending_calls.lock().await.len()
    }
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("peer_addr", &self.peer_addr)
            .field("extranonce1", &self.extranonce1_hex())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
