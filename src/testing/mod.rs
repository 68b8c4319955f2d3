// Test doubles for the transport and the REST collaborator

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::api::PermissionsApi;
use crate::cache::PermissionSource;
use crate::error::SyncError;
use crate::transport::connector::{Connector, Frame, Link, LinkEvent};
use crate::types::{Group, Permission, UserPermissions};

/// Let spawned tasks run. Under a paused clock this advances time by 1ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn perms(codenames: &[&str]) -> UserPermissions {
    let direct_permissions = codenames
        .iter()
        .enumerate()
        .map(|(i, c)| Permission::new(i as i64 + 1, format!("Can {}", c.replace('_', " ")), *c))
        .collect();
    UserPermissions::new(direct_permissions, vec![Group::new(1, "Staff")])
}

/// Server side of a mock link
pub struct MockPeer {
    to_client: mpsc::UnboundedSender<LinkEvent>,
    from_client: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl MockPeer {
    fn pair() -> (Arc<MockPeer>, Link) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let peer = Arc::new(MockPeer {
            to_client,
            from_client: Mutex::new(from_client),
        });
        (peer, Link { outbound, inbound })
    }

    pub fn push(&self, message: serde_json::Value) {
        self.push_text(&message.to_string());
    }

    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(LinkEvent::Text(text.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(LinkEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Frames the client has written so far
    pub fn drain(&self) -> Vec<Frame> {
        let mut rx = self.from_client.lock();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }
}

/// A connection attempt waiting for the test to decide its outcome
pub struct PendingConnect {
    pub url: Url,
    reply: oneshot::Sender<Result<Link, SyncError>>,
}

impl PendingConnect {
    pub fn accept(self) -> Arc<MockPeer> {
        let (peer, link) = MockPeer::pair();
        let _ = self.reply.send(Ok(link));
        peer
    }

    pub fn refuse(self) {
        let _ = self.reply.send(Err(SyncError::transport("connection refused")));
    }
}

#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub url: Url,
    pub at: tokio::time::Instant,
}

enum Mode {
    Accept,
    Refuse,
    Manual(mpsc::UnboundedSender<PendingConnect>),
}

pub struct MockConnector {
    mode: Mode,
    attempts: Mutex<Vec<ConnectAttempt>>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockConnector {
    fn with_mode(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            attempts: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Every attempt opens immediately
    pub fn accepting() -> Arc<Self> {
        Self::with_mode(Mode::Accept)
    }

    /// Every attempt fails immediately
    pub fn refusing() -> Arc<Self> {
        Self::with_mode(Mode::Refuse)
    }

    /// Every attempt waits until the test accepts or refuses it
    pub fn manual() -> (Arc<Self>, mpsc::UnboundedReceiver<PendingConnect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_mode(Mode::Manual(tx)), rx)
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn last_peer(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: Url) -> Result<Link, SyncError> {
        self.attempts.lock().push(ConnectAttempt {
            url: url.clone(),
            at: tokio::time::Instant::now(),
        });
        match &self.mode {
            Mode::Accept => {
                let (peer, link) = MockPeer::pair();
                self.peers.lock().push(peer);
                Ok(link)
            }
            Mode::Refuse => Err(SyncError::transport("connection refused")),
            Mode::Manual(pending) => {
                let (reply, rx) = oneshot::channel();
                pending
                    .send(PendingConnect { url, reply })
                    .map_err(|_| SyncError::transport("test dropped pending receiver"))?;
                rx.await
                    .map_err(|_| SyncError::transport("test dropped pending connect"))?
            }
        }
    }
}

/// Scripted permission source. Results are popped in order; once the script
/// is empty the fallback result is returned.
pub struct MockSource {
    script: Mutex<VecDeque<Result<UserPermissions, SyncError>>>,
    fallback: Mutex<Result<UserPermissions, SyncError>>,
    delay: Duration,
    loads: AtomicUsize,
    refetches: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    forgotten: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn returning(result: Result<UserPermissions, SyncError>) -> Arc<Self> {
        Self::delayed(result, Duration::ZERO)
    }

    /// Every fetch takes `delay` before resolving
    pub fn delayed(result: Result<UserPermissions, SyncError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(result),
            delay,
            loads: AtomicUsize::new(0),
            refetches: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
        })
    }

    pub fn then(&self, result: Result<UserPermissions, SyncError>) {
        self.script.lock().push_back(result);
    }

    pub fn set_fallback(&self, result: Result<UserPermissions, SyncError>) {
        *self.fallback.lock() = result;
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn refetches(&self) -> usize {
        self.refetches.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.loads() + self.refetches()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }

    /// Tokens released through `forget`, in order
    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().clone()
    }

    async fn next(&self, token: &str) -> Result<UserPermissions, SyncError> {
        self.tokens.lock().push(token.to_string());
        let result = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        result
    }
}

#[async_trait]
impl PermissionSource for MockSource {
    async fn load(&self, token: &str) -> Result<UserPermissions, SyncError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.next(token).await
    }

    async fn refetch(&self, token: &str) -> Result<UserPermissions, SyncError> {
        self.refetches.fetch_add(1, Ordering::SeqCst);
        self.next(token).await
    }

    async fn group_permissions(&self, _token: &str, group_id: i64) -> Result<Vec<Permission>, SyncError> {
        match group_id {
            1 => Ok(vec![Permission::new(10, "Can view owner", "view_owner")]),
            _ => Err(SyncError::api(404, "group not found")),
        }
    }

    fn forget(&self, token: &str) {
        self.forgotten.lock().push(token.to_string());
    }
}

/// Counting REST double
pub struct MockApi {
    result: Mutex<Result<UserPermissions, SyncError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockApi {
    pub fn new(result: Result<UserPermissions, SyncError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_result(&self, result: Result<UserPermissions, SyncError>) {
        *self.result.lock() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionsApi for MockApi {
    async fn current_user_permissions(&self, _token: &str) -> Result<UserPermissions, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.lock().clone()
    }

    async fn group_permissions(&self, _token: &str, group_id: i64) -> Result<Vec<Permission>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match group_id {
            1 => Ok(vec![Permission::new(10, "Can view owner", "view_owner")]),
            _ => Err(SyncError::api(404, "group not found")),
        }
    }
}
