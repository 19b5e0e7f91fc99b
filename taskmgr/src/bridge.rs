//! Connection bridge to the privileged data source.
//!
//! One session, many callers: every request goes through a single mutex around the transport,
//! so pollers may call concurrently. Transport failures never reach callers as errors; requests
//! degrade to `None` (or a definite failure value for side-effecting calls) and the failure is
//! reported on the status channel instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::decode::decode_kill_candidates;
use crate::error::BridgeError;
use crate::poll::PollHandle;
use crate::types::Category;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Unbound,
    Binding,
    Bound,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub state: ConnectionState,
    /// Why the last connect or request failed; cleared on a successful bind.
    pub last_error: Option<String>,
}

/// Every privileged call the bridge can make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ProcessList,
    ExtendedInfo { pid: i32 },
    DeepSnapshot { pid: i32 },
    SendSignal { pid: i32, signal: i32 },
    KillCandidates,
    ExecuteKill { keys: Vec<String> },
    Snapshot(Category),
    MiniSnapshot,
    FreeRam,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::ProcessList => "get_process_list",
            Request::ExtendedInfo { .. } => "get_process_extended_info",
            Request::DeepSnapshot { .. } => "get_process_deep_snapshot",
            Request::SendSignal { .. } => "send_signal",
            Request::KillCandidates => "get_kill_candidates",
            Request::ExecuteKill { .. } => "execute_kill_transaction",
            Request::Snapshot(Category::Cpu) => "get_cpu_snapshot",
            Request::Snapshot(Category::Gpu) => "get_gpu_snapshot",
            Request::Snapshot(Category::Memory) => "get_memory_snapshot",
            Request::Snapshot(Category::Disk) => "get_disk_snapshot",
            Request::Snapshot(Category::Net) => "get_net_snapshot",
            Request::MiniSnapshot => "get_mini_snapshot",
            Request::FreeRam => "get_free_ram",
        }
    }

    /// Text frame sent to the source: the op name, then space-separated arguments.
    pub fn encode(&self) -> String {
        match self {
            Request::ExtendedInfo { pid } | Request::DeepSnapshot { pid } => {
                format!("{} {pid}", self.op())
            }
            Request::SendSignal { pid, signal } => format!("{} {pid} {signal}", self.op()),
            Request::ExecuteKill { keys } => format!("{} {}", self.op(), keys.join("|")),
            _ => self.op().to_string(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Result of a batch kill. `Freed(0)` means the call went through but reclaimed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReport {
    Freed(u64),
    Failed,
}

/// A live session: one request in, one reply out.
pub trait Transport: Send {
    fn call<'a>(&'a mut self, request: &'a Request) -> BoxFuture<'a, Result<String, BridgeError>>;
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens sessions to the privileged source.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>, BridgeError>>;
}

// ---------- WebSocket transport ----------

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>, BridgeError>> {
        Box::pin(async move {
            let (ws, _) = connect_async(self.url.as_str())
                .await
                .map_err(|e| BridgeError::Connect(e.to_string()))?;
            Ok(Box::new(WsTransport { ws }) as Box<dyn Transport>)
        })
    }
}

pub struct WsTransport {
    ws: WsStream,
}

impl Transport for WsTransport {
    fn call<'a>(&'a mut self, request: &'a Request) -> BoxFuture<'a, Result<String, BridgeError>> {
        Box::pin(async move {
            self.ws.send(Message::Text(request.encode())).await?;
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(reply))) => return Ok(reply),
                    Some(Ok(Message::Binary(bytes))) => {
                        return String::from_utf8(bytes)
                            .map_err(|e| BridgeError::UnexpectedFrame(e.to_string()))
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(BridgeError::Closed),
                    Some(Ok(_)) => continue, // ping/pong/raw frames
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.ws.close(None).await;
        })
    }
}

// ---------- In-process transport ----------

pub type LoopbackHandler = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// Serves requests from a handler in the same process. A handler returning `None` behaves like
/// a dropped transport.
#[derive(Clone)]
pub struct LoopbackConnector {
    handler: LoopbackHandler,
    accept: Arc<AtomicBool>,
    delay: Duration,
}

impl LoopbackConnector {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            accept: Arc::new(AtomicBool::new(true)),
            delay: Duration::ZERO,
        }
    }

    /// Delay every reply, e.g. to exercise request timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Refuse (false) or allow (true) new sessions, as a permission prompt would.
    pub fn set_accepting(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Transport>, BridgeError>> {
        Box::pin(async move {
            if !self.accept.load(Ordering::SeqCst) {
                return Err(BridgeError::Connect("permission denied".into()));
            }
            Ok(Box::new(LoopbackTransport {
                handler: self.handler.clone(),
                delay: self.delay,
            }) as Box<dyn Transport>)
        })
    }
}

struct LoopbackTransport {
    handler: LoopbackHandler,
    delay: Duration,
}

impl Transport for LoopbackTransport {
    fn call<'a>(&'a mut self, request: &'a Request) -> BoxFuture<'a, Result<String, BridgeError>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.handler)(request).ok_or(BridgeError::Closed)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

// ---------- Bridge ----------

#[derive(Debug, Clone, Copy)]
pub struct BridgeTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(3_000),
            request: Duration::from_millis(2_000),
        }
    }
}

pub struct Bridge {
    connector: Box<dyn Connector>,
    session: Mutex<Option<Box<dyn Transport>>>,
    status: watch::Sender<BridgeStatus>,
    timeouts: BridgeTimeouts,
}

impl Bridge {
    pub fn new<C: Connector + 'static>(connector: C, timeouts: BridgeTimeouts) -> Self {
        let (status, _) = watch::channel(BridgeStatus {
            state: ConnectionState::Unbound,
            last_error: None,
        });
        Self {
            connector: Box::new(connector),
            session: Mutex::new(None),
            status,
            timeouts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> BridgeStatus {
        self.status.borrow().clone()
    }

    /// Status channel; connect failures surface here, never through requests.
    pub fn subscribe(&self) -> watch::Receiver<BridgeStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: ConnectionState, last_error: Option<String>) {
        self.status.send_if_modified(|s| {
            let changed = s.state != state || s.last_error != last_error;
            s.state = state;
            s.last_error = last_error;
            changed
        });
    }

    /// Bind a session. Idempotent while bound.
    pub async fn connect(&self) -> ConnectionState {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return ConnectionState::Bound;
        }
        self.set_state(ConnectionState::Binding, self.status().last_error);
        debug!("binding privileged session");
        match timeout(self.timeouts.connect, self.connector.connect()).await {
            Ok(Ok(transport)) => {
                *session = Some(transport);
                self.set_state(ConnectionState::Bound, None);
                info!("privileged session bound");
                ConnectionState::Bound
            }
            Ok(Err(e)) => {
                warn!("privileged session bind failed: {e}");
                self.set_state(ConnectionState::Disconnected, Some(e.to_string()));
                ConnectionState::Disconnected
            }
            Err(_) => {
                let e = BridgeError::Timeout(self.timeouts.connect.as_millis() as u64);
                warn!("privileged session bind failed: {e}");
                self.set_state(ConnectionState::Disconnected, Some(e.to_string()));
                ConnectionState::Disconnected
            }
        }
    }

    /// Tear down the session. A no-op when already unbound.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut transport) = session.take() {
            transport.close().await;
            info!("privileged session closed");
        }
        if self.state() != ConnectionState::Unbound {
            self.set_state(ConnectionState::Unbound, None);
        }
    }

    async fn drop_session(&self, mut transport: Box<dyn Transport>, err: BridgeError) {
        // best effort; the peer may already be gone
        let _ = timeout(Duration::from_millis(200), transport.close()).await;
        self.set_state(ConnectionState::Disconnected, Some(err.to_string()));
    }

    /// Issue one call. `None` when unbound, on transport error, or on timeout.
    ///
    /// The transport is held outside the session slot while the call runs, so a caller that
    /// drops this future mid-call leaves the bridge Disconnected instead of desynchronized.
    pub async fn request(&self, request: Request) -> Option<String> {
        let mut session = self.session.lock().await;
        let Some(mut transport) = session.take() else {
            debug!(op = request.op(), "{}", BridgeError::NotBound);
            return None;
        };
        let mut in_flight = InFlight {
            bridge: self,
            armed: true,
        };
        let outcome = timeout(self.timeouts.request, transport.call(&request)).await;
        in_flight.armed = false;

        match outcome {
            Ok(Ok(reply)) => {
                *session = Some(transport);
                Some(reply)
            }
            Ok(Err(e)) => {
                warn!(op = request.op(), "privileged call failed: {e}");
                self.drop_session(transport, e).await;
                None
            }
            Err(_) => {
                // a late reply would pair with the next request; drop the session instead
                let e = BridgeError::Timeout(self.timeouts.request.as_millis() as u64);
                warn!(op = request.op(), "privileged call failed: {e}");
                self.drop_session(transport, e).await;
                None
            }
        }
    }

    pub async fn process_list(&self) -> Option<String> {
        self.request(Request::ProcessList).await
    }

    pub async fn extended_info(&self, pid: i32) -> Option<String> {
        self.request(Request::ExtendedInfo { pid }).await
    }

    pub async fn deep_snapshot(&self, pid: i32) -> Option<String> {
        self.request(Request::DeepSnapshot { pid }).await
    }

    /// `false` covers both "not delivered" and "rejected by the source".
    pub async fn send_signal(&self, pid: i32, signal: i32) -> bool {
        match self.request(Request::SendSignal { pid, signal }).await {
            Some(reply) => matches!(reply.trim(), "1" | "true" | "ok"),
            None => false,
        }
    }

    pub async fn kill_candidates(&self) -> Option<Vec<String>> {
        self.request(Request::KillCandidates)
            .await
            .map(|raw| decode_kill_candidates(&raw))
    }

    pub async fn execute_kill_transaction(&self, keys: &[String]) -> KillReport {
        let reply = self
            .request(Request::ExecuteKill {
                keys: keys.to_vec(),
            })
            .await;
        match reply.as_deref().map(str::trim).map(str::parse::<i64>) {
            Some(Ok(freed)) => KillReport::Freed(freed.max(0) as u64),
            Some(Err(_)) => {
                warn!("kill transaction reply was not a byte count");
                KillReport::Failed
            }
            None => KillReport::Failed,
        }
    }

    pub async fn snapshot(&self, category: Category) -> Option<String> {
        self.request(Request::Snapshot(category)).await
    }

    pub async fn mini_snapshot(&self) -> Option<String> {
        self.request(Request::MiniSnapshot).await
    }

    pub async fn free_ram(&self) -> Option<u64> {
        self.request(Request::FreeRam)
            .await
            .and_then(|r| r.trim().parse::<u64>().ok())
    }
}

/// Marks the bridge Disconnected if a request future is dropped before its reply arrived.
struct InFlight<'a> {
    bridge: &'a Bridge,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("privileged call abandoned mid-flight, dropping session");
            self.bridge.set_state(
                ConnectionState::Disconnected,
                Some(BridgeError::Abandoned.to_string()),
            );
        }
    }
}

/// Rebind a dropped session every `every`. An explicitly unbound bridge is left alone.
pub fn spawn_reconnect(bridge: Arc<Bridge>, every: Duration) -> PollHandle {
    PollHandle::every(every, move || {
        let bridge = bridge.clone();
        async move {
            if bridge.state() == ConnectionState::Disconnected {
                debug!("reconnecting privileged session");
                bridge.connect().await;
            }
        }
    })
}
