// Reconnecting permission event client
//
// Every connection attempt gets a fresh connection id. Each task spawned for
// an attempt captures that id and compares it with the current one before it
// touches shared state, so callbacks from superseded attempts are inert.

pub mod backoff;
pub mod connector;
pub mod message;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WebSocketConfig;
use crate::error::SyncError;
use crate::types::ConnectionState;

use backoff::{Backoff, ReconnectPolicy};
use connector::{endpoint_url, Connector, Frame, Link, LinkEvent};
use message::{ClientMessage, Inbound, ServerMessage, CLOSE_ABNORMAL, CLOSE_NORMAL};

pub type Callback = Arc<dyn Fn() + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&ServerMessage) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback bindings. `Transport::set_handlers` merges: only the bindings
/// present in the new value replace existing ones.
#[derive(Clone, Default)]
pub struct TransportHandlers {
    pub on_connect: Option<Callback>,
    pub on_disconnect: Option<Callback>,
    pub on_error: Option<ErrorCallback>,
    pub on_state_change: Option<StateCallback>,
    pub on_permission_update: Option<MessageCallback>,
    pub on_user_permission_change: Option<MessageCallback>,
    pub on_permissions_data: Option<MessageCallback>,
}

impl TransportHandlers {
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_state_change(mut self, f: impl Fn(ConnectionState) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    pub fn on_permission_update(mut self, f: impl Fn(&ServerMessage) + Send + Sync + 'static) -> Self {
        self.on_permission_update = Some(Arc::new(f));
        self
    }

    pub fn on_user_permission_change(mut self, f: impl Fn(&ServerMessage) + Send + Sync + 'static) -> Self {
        self.on_user_permission_change = Some(Arc::new(f));
        self
    }

    pub fn on_permissions_data(mut self, f: impl Fn(&ServerMessage) + Send + Sync + 'static) -> Self {
        self.on_permissions_data = Some(Arc::new(f));
        self
    }

    fn merge(&mut self, other: TransportHandlers) {
        if other.on_connect.is_some() {
            self.on_connect = other.on_connect;
        }
        if other.on_disconnect.is_some() {
            self.on_disconnect = other.on_disconnect;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
        if other.on_state_change.is_some() {
            self.on_state_change = other.on_state_change;
        }
        if other.on_permission_update.is_some() {
            self.on_permission_update = other.on_permission_update;
        }
        if other.on_user_permission_change.is_some() {
            self.on_user_permission_change = other.on_user_permission_change;
        }
        if other.on_permissions_data.is_some() {
            self.on_permissions_data = other.on_permissions_data;
        }
    }
}

impl std::fmt::Debug for TransportHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_permission_update", &self.on_permission_update.is_some())
            .field("on_user_permission_change", &self.on_user_permission_change.is_some())
            .field("on_permissions_data", &self.on_permissions_data.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub auth_rejected_code: u16,
}

impl From<&WebSocketConfig> for TransportOptions {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            url: config.url.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            reconnect: config.reconnect_policy(),
            auth_rejected_code: config.auth_rejected_close_code,
        }
    }
}

/// Point-in-time view of the transport, for debugging and UI display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStatus {
    pub state: ConnectionState,
    pub connection_id: u64,
    pub connecting: bool,
    pub reconnect_attempts: u32,
    pub reconnect_pending: bool,
}

struct Shared {
    connection_id: u64,
    state: ConnectionState,
    connecting: bool,
    manual_close: bool,
    token: Option<String>,
    backoff: Backoff,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    reader_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl Shared {
    /// Returns true when the state actually changed
    fn set_state(&mut self, state: ConnectionState) -> bool {
        let changed = self.state != state;
        self.state = state;
        changed
    }

    /// Stop timers and tasks for the current connection and close it normally
    fn teardown(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Frame::Close(CLOSE_NORMAL));
        }
    }
}

struct Inner {
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    handlers: Mutex<TransportHandlers>,
}

/// Reconnecting client for the permission event endpoint.
///
/// Holds at most one live connection. Failures never propagate to callers;
/// they are logged, reported to `on_error`, and handed to the reconnect policy.
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub fn new(options: TransportOptions, connector: Arc<dyn Connector>) -> Self {
        let backoff = Backoff::new(options.reconnect);
        Self {
            inner: Arc::new(Inner {
                options,
                connector,
                shared: Mutex::new(Shared {
                    connection_id: 0,
                    state: ConnectionState::Disconnected,
                    connecting: false,
                    manual_close: false,
                    token: None,
                    backoff,
                    outbound: None,
                    reader_task: None,
                    heartbeat_task: None,
                    reconnect_timer: None,
                }),
                handlers: Mutex::new(TransportHandlers::default()),
            }),
        }
    }

    /// Open a connection authenticated with `token`.
    ///
    /// No-op while connected or connecting with the same token. A different
    /// token supersedes whatever is live or in flight. Restarts the reconnect
    /// budget. Returns once the attempt is dispatched; must be called inside a
    /// tokio runtime.
    pub fn connect(&self, token: &str) {
        self.inner.start(token, true);
    }

    /// Close the connection normally and cancel any pending reconnect.
    /// The only way to stop the reconnect policy.
    pub fn disconnect(&self) {
        self.inner.stop();
    }

    /// Fire-and-forget send; dropped when not connected
    pub fn send(&self, message: &ClientMessage) {
        self.inner.send(message);
    }

    pub fn set_handlers(&self, handlers: TransportHandlers) {
        self.inner.handlers.lock().merge(handlers);
    }

    pub fn status(&self) -> TransportStatus {
        let shared = self.inner.shared.lock();
        TransportStatus {
            state: shared.state,
            connection_id: shared.connection_id,
            connecting: shared.connecting,
            reconnect_attempts: shared.backoff.attempts(),
            reconnect_pending: shared.reconnect_timer.is_some(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let mut shared = self.inner.shared.lock();
        shared.manual_close = true;
        shared.connecting = false;
        shared.teardown();
    }
}

impl Inner {
    fn handlers(&self) -> TransportHandlers {
        self.handlers.lock().clone()
    }

    fn emit_state(&self, state: ConnectionState) {
        if let Some(cb) = self.handlers().on_state_change {
            cb(state);
        }
    }

    fn emit_error(&self, error: &SyncError) {
        if let Some(cb) = self.handlers().on_error {
            cb(error);
        }
    }

    fn start(self: &Arc<Self>, token: &str, explicit: bool) {
        let mut shared = self.shared.lock();
        let same_token = shared.token.as_deref() == Some(token);
        if same_token && (shared.connecting || shared.state == ConnectionState::Connected) {
            tracing::debug!("connect skipped: connection already open or in flight");
            return;
        }

        shared.teardown();
        if explicit {
            shared.backoff.reset();
        }
        shared.connection_id += 1;
        shared.token = Some(token.to_string());
        shared.manual_close = false;
        let id = shared.connection_id;

        let url = match endpoint_url(&self.options.url, token) {
            Ok(url) => url,
            Err(e) => {
                shared.connecting = false;
                let changed = shared.set_state(ConnectionState::Disconnected);
                drop(shared);
                tracing::warn!("cannot build permission socket URL: {}", e);
                if changed {
                    self.emit_state(ConnectionState::Disconnected);
                }
                self.emit_error(&e);
                return;
            }
        };

        shared.connecting = true;
        let changed = shared.set_state(ConnectionState::Connecting);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.connector.connect(url).await {
                Ok(link) => this.handle_open(id, link),
                Err(e) => {
                    this.handle_error(id, &e);
                    this.handle_close(id, CLOSE_ABNORMAL, e.to_string());
                }
            }
        });
        drop(shared);

        tracing::debug!("permission socket connecting (connection {})", id);
        if changed {
            self.emit_state(ConnectionState::Connecting);
        }
    }

    fn stop(&self) {
        let mut shared = self.shared.lock();
        shared.manual_close = true;
        shared.connecting = false;
        shared.teardown();
        let was_connected = shared.state == ConnectionState::Connected;
        let changed = shared.set_state(ConnectionState::Disconnected);
        let id = shared.connection_id;
        drop(shared);

        tracing::info!("permission socket disconnected by client (connection {})", id);
        if changed {
            self.emit_state(ConnectionState::Disconnected);
        }
        if was_connected {
            if let Some(cb) = self.handlers().on_disconnect {
                cb();
            }
        }
    }

    fn send(&self, message: &ClientMessage) {
        let outbound = {
            let shared = self.shared.lock();
            match shared.state {
                ConnectionState::Connected => shared.outbound.clone(),
                _ => None,
            }
        };
        let Some(outbound) = outbound else {
            tracing::debug!("socket not connected; dropping outbound {:?}", message);
            return;
        };
        match message.encode() {
            Ok(text) => {
                if outbound.send(Frame::Text(text)).is_err() {
                    tracing::debug!("socket writer gone; dropping outbound {:?}", message);
                }
            }
            Err(e) => tracing::warn!("failed to encode outbound message: {}", e),
        }
    }

    fn handle_open(self: &Arc<Self>, id: u64, link: Link) {
        let mut shared = self.shared.lock();
        if shared.connection_id != id || !shared.connecting {
            drop(shared);
            tracing::debug!("connection {} opened after being superseded; closing it", id);
            let _ = link.outbound.send(Frame::Close(CLOSE_NORMAL));
            return;
        }

        shared.connecting = false;
        shared.backoff.reset();
        shared.outbound = Some(link.outbound);
        let changed = shared.set_state(ConnectionState::Connected);

        let this = Arc::clone(self);
        let period = self.options.heartbeat_interval;
        shared.heartbeat_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                this.send(&ClientMessage::Ping);
            }
        }));

        let this = Arc::clone(self);
        let mut inbound = link.inbound;
        shared.reader_task = Some(tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    LinkEvent::Text(text) => this.handle_message(id, &text),
                    LinkEvent::Error(e) => this.handle_error(id, &SyncError::transport(e)),
                    LinkEvent::Closed { code, reason } => {
                        this.handle_close(id, code, reason);
                        return;
                    }
                }
            }
            this.handle_close(id, CLOSE_ABNORMAL, "link dropped".to_string());
        }));
        drop(shared);

        tracing::info!("permission socket connected (connection {})", id);
        if changed {
            self.emit_state(ConnectionState::Connected);
        }
        if let Some(cb) = self.handlers().on_connect {
            cb();
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.shared.lock().connection_id == id
    }

    fn handle_message(&self, id: u64, text: &str) {
        if !self.is_current(id) {
            tracing::debug!("dropping message from superseded connection {}", id);
            return;
        }
        match ServerMessage::decode(text) {
            Ok(Inbound::Message(message)) => self.dispatch(&message),
            Ok(Inbound::Unrecognized(kind)) => {
                tracing::debug!("ignoring unrecognized socket message type '{}'", kind)
            }
            Err(e) => tracing::warn!("failed to parse socket message: {}", e),
        }
    }

    fn dispatch(&self, message: &ServerMessage) {
        let handlers = self.handlers();
        match message {
            ServerMessage::ConnectionSuccess { message, user_id } => {
                tracing::info!(
                    "permission socket acknowledged: user={:?} {}",
                    user_id,
                    message.as_deref().unwrap_or_default()
                );
            }
            ServerMessage::PermissionUpdate { .. } => {
                if let Some(cb) = handlers.on_permission_update {
                    cb(message);
                }
            }
            ServerMessage::UserPermissionChange { .. } => {
                if let Some(cb) = handlers.on_user_permission_change {
                    cb(message);
                }
            }
            ServerMessage::PermissionsData { .. } => {
                if let Some(cb) = handlers.on_permissions_data {
                    cb(message);
                }
            }
            ServerMessage::Pong { .. } => tracing::trace!("pong"),
            ServerMessage::Error { message } => {
                let error = SyncError::transport(message.clone().unwrap_or_else(|| "server error".to_string()));
                tracing::warn!("permission socket reported: {}", error);
                if let Some(cb) = handlers.on_error {
                    cb(&error);
                }
            }
            ServerMessage::Unknown => tracing::debug!("ignoring unknown socket message"),
        }
    }

    fn handle_error(&self, id: u64, error: &SyncError) {
        if !self.is_current(id) {
            return;
        }
        tracing::warn!("permission socket error (connection {}): {}", id, error);
        self.emit_error(error);
    }

    fn handle_close(self: &Arc<Self>, id: u64, code: u16, reason: String) {
        let mut shared = self.shared.lock();
        if shared.connection_id != id {
            tracing::debug!("ignoring close from superseded connection {}", id);
            return;
        }

        shared.connecting = false;
        shared.outbound = None;
        if let Some(task) = shared.heartbeat_task.take() {
            task.abort();
        }
        // Usually called from the reader itself, which returns right after
        shared.reader_task.take();
        let changed = shared.set_state(ConnectionState::Disconnected);

        let terminal = shared.manual_close || code == CLOSE_NORMAL || code == self.options.auth_rejected_code;
        let delay = if terminal { None } else { shared.backoff.next_delay() };
        if let Some(delay) = delay {
            let this = Arc::clone(self);
            shared.reconnect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.reconnect_due(id);
            }));
        }
        let attempts = shared.backoff.attempts();
        drop(shared);

        tracing::info!("permission socket closed (connection {}, code {}) {}", id, code, reason);
        match delay {
            Some(delay) => tracing::info!(
                "reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                attempts,
                self.options.reconnect.max_attempts
            ),
            None if !terminal => {
                tracing::warn!("reconnect attempts exhausted; staying disconnected until next connect")
            }
            None => {}
        }

        if changed {
            self.emit_state(ConnectionState::Disconnected);
        }
        if let Some(cb) = self.handlers().on_disconnect {
            cb();
        }
    }

    fn reconnect_due(self: &Arc<Self>, id: u64) {
        let token = {
            let mut shared = self.shared.lock();
            shared.reconnect_timer.take();
            if shared.connection_id != id || shared.connecting || shared.state == ConnectionState::Connected {
                tracing::debug!("reconnect skipped: a connection is already open or in flight");
                return;
            }
            shared.token.clone()
        };
        if let Some(token) = token {
            self.start(&token, false);
        }
    }
}
