// Permission sync manager
//
// Owns the process-wide permission snapshot. Loads it through the cache
// layer, keeps it fresh from the event socket, and serves synchronous reads.
// Nothing in the public API fails or blocks once the first load is done;
// failures go to the FailurePolicy and the last known snapshot stays.

pub mod debounce;
pub mod policy;
pub mod state;
pub mod subscribers;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::api::HttpPermissionsApi;
use crate::cache::{CachedPermissionSource, PermissionSource};
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::transport::connector::{Connector, WsConnector};
use crate::transport::message::ServerMessage;
use crate::transport::{Transport, TransportHandlers, TransportOptions, TransportStatus};
use crate::types::{ConnectionState, Group, Permission, UserPermissions};

use debounce::Debouncer;
use policy::{FailurePolicy, FailureStage, SilentFallback};
use state::{PermissionQuery, SyncSnapshot};
use subscribers::{Subscribers, Subscription};

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    initialized: bool,
    /// Bumped on every initialize and cleanup; fetches carry the value they started under
    epoch: u64,
    /// Successful opens within this session
    connects: u32,
    /// Token whose permissions the snapshot holds; survives cleanup
    owner: Option<String>,
}

struct ManagerInner {
    transport: Transport,
    source: Arc<dyn PermissionSource>,
    policy: Arc<dyn FailurePolicy>,
    snapshot: ArcSwap<SyncSnapshot>,
    /// Serializes read-modify-write of the snapshot
    write: Mutex<()>,
    /// Bumped whenever a pushed payload is applied
    push_epoch: AtomicU64,
    /// Push epoch still waiting for a server fetch that started after it; 0 when none
    reconcile_owed: AtomicU64,
    /// Refresh armed for the end of the debounce window
    trailing: Mutex<Option<JoinHandle<()>>>,
    session: Mutex<Session>,
    debounce: Debouncer,
    subscribers: Subscribers,
}

/// Single source of truth for the current user's permissions and groups.
///
/// Construct one at startup and hand clones to consumers; clones share state.
#[derive(Clone)]
pub struct PermissionSyncManager {
    inner: Arc<ManagerInner>,
}

pub struct SyncManagerBuilder {
    source: Arc<dyn PermissionSource>,
    connector: Arc<dyn Connector>,
    transport: TransportOptions,
    policy: Arc<dyn FailurePolicy>,
    refresh_debounce: Duration,
}

impl SyncManagerBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn transport_options(mut self, options: TransportOptions) -> Self {
        self.transport = options;
        self
    }

    pub fn failure_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn refresh_debounce(mut self, interval: Duration) -> Self {
        self.refresh_debounce = interval;
        self
    }

    pub fn build(self) -> PermissionSyncManager {
        let inner = Arc::new(ManagerInner {
            transport: Transport::new(self.transport, self.connector),
            source: self.source,
            policy: self.policy,
            snapshot: ArcSwap::from_pointee(SyncSnapshot::default()),
            write: Mutex::new(()),
            push_epoch: AtomicU64::new(0),
            reconcile_owed: AtomicU64::new(0),
            trailing: Mutex::new(None),
            session: Mutex::new(Session::default()),
            debounce: Debouncer::new(self.refresh_debounce),
            subscribers: Subscribers::default(),
        });
        inner.transport.set_handlers(transport_handlers(Arc::downgrade(&inner)));
        PermissionSyncManager { inner }
    }
}

/// Transport callbacks hold only a weak reference back to the manager
fn transport_handlers(weak: Weak<ManagerInner>) -> TransportHandlers {
    let on_state = weak.clone();
    let on_connect = weak.clone();
    let on_error = weak.clone();
    let on_update = weak.clone();
    let on_change = weak.clone();
    let on_data = weak;

    TransportHandlers::default()
        .on_state_change(move |_| {
            if let Some(inner) = on_state.upgrade() {
                inner.mirror_connection();
            }
        })
        .on_connect(move || {
            if let Some(inner) = on_connect.upgrade() {
                inner.connected();
            }
        })
        .on_error(move |error| {
            if let Some(inner) = on_error.upgrade() {
                inner.policy.swallow(FailureStage::Transport, error);
            }
        })
        .on_permission_update(move |_| {
            if let Some(inner) = on_update.upgrade() {
                tracing::debug!("permission_update received; refreshing");
                inner.request_refresh();
            }
        })
        .on_user_permission_change(move |message| {
            if let Some(inner) = on_change.upgrade() {
                match message {
                    ServerMessage::UserPermissionChange { permissions, groups, .. }
                        if permissions.is_some() || groups.is_some() =>
                    {
                        inner.apply_push(permissions.clone(), groups.clone());
                        inner.request_reconcile();
                    }
                    _ => inner.request_refresh(),
                }
            }
        })
        .on_permissions_data(move |message| {
            if let Some(inner) = on_data.upgrade() {
                match message {
                    ServerMessage::PermissionsData { permissions, groups }
                        if permissions.is_some() || groups.is_some() =>
                    {
                        inner.apply_push(permissions.clone(), groups.clone());
                    }
                    _ => inner.request_refresh(),
                }
            }
        })
}

impl PermissionSyncManager {
    pub fn builder(source: Arc<dyn PermissionSource>) -> SyncManagerBuilder {
        SyncManagerBuilder {
            source,
            connector: Arc::new(WsConnector),
            transport: TransportOptions::from(&crate::config::WebSocketConfig::default()),
            policy: Arc::new(SilentFallback),
            refresh_debounce: Duration::from_millis(3000),
        }
    }

    /// Production wiring: REST through the query cache, events over WebSocket
    pub fn from_config(config: &AppConfig) -> Result<Self, SyncError> {
        let api = Arc::new(HttpPermissionsApi::new(&config.api)?);
        let source = Arc::new(CachedPermissionSource::new(api, config.sync.cache_stale_time()));
        Ok(Self::builder(source)
            .transport_options(TransportOptions::from(&config.websocket))
            .refresh_debounce(config.sync.refresh_debounce())
            .build())
    }

    /// Start syncing for `token`.
    ///
    /// No-op when already initialized with the same token; a different token
    /// tears the previous session down first. Returns once the initial load and
    /// the socket connection are dispatched, not when data has arrived.
    pub async fn initialize(&self, token: &str) {
        self.inner.initialize(token);
        tokio::task::yield_now().await;
    }

    /// Stop the socket and forget the session. Permission state is kept.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    /// Debounced background refresh
    pub fn refresh_permissions(&self) {
        self.inner.request_refresh();
    }

    /// Drop and re-open the socket with the current session token
    pub fn reconnect(&self) {
        let token = {
            let session = self.inner.session.lock();
            match (&session.token, session.initialized) {
                (Some(token), true) => token.clone(),
                _ => {
                    tracing::debug!("reconnect requested without an active session");
                    return;
                }
            }
        };
        tracing::info!("manual reconnect requested");
        self.inner.transport.disconnect();
        self.inner.transport.connect(&token);
    }

    /// Synchronous check against the current snapshot. Superusers always pass.
    pub fn has_permission<Q: PermissionQuery + ?Sized>(&self, query: &Q, is_superuser: bool) -> bool {
        is_superuser || self.inner.snapshot.load().has_permission(query, false)
    }

    pub fn has_all_permissions<T: AsRef<str>>(&self, codenames: &[T], is_superuser: bool) -> bool {
        is_superuser || self.inner.snapshot.load().has_all_permissions(codenames, false)
    }

    pub fn snapshot(&self) -> Arc<SyncSnapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn permissions(&self) -> Vec<Permission> {
        self.inner.snapshot.load().permissions.clone()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.inner.snapshot.load().groups.clone()
    }

    pub fn permissions_for_model(&self, app_label: &str, model: &str) -> Vec<Permission> {
        self.inner.snapshot.load().permissions_for_model(app_label, model)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.snapshot.load().is_loading
    }

    pub fn has_initial_load(&self) -> bool {
        self.inner.snapshot.load().has_initial_load
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.snapshot.load().connection
    }

    pub fn transport_status(&self) -> TransportStatus {
        self.inner.transport.status()
    }

    /// Always `None`: failures are handled by the FailurePolicy and never shown
    pub fn error(&self) -> Option<SyncError> {
        None
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.session.lock().initialized
    }

    /// Register a listener called after every state change
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.subscribers.subscribe(listener)
    }

    /// Permissions bundled by one group, for display. Empty on any failure.
    pub async fn group_permissions(&self, group_id: i64) -> Vec<Permission> {
        let token = self.inner.session.lock().token.clone();
        let Some(token) = token else {
            self.inner.policy.swallow(FailureStage::GroupPermissions, &SyncError::MissingToken);
            return Vec::new();
        };
        match self.inner.source.group_permissions(&token, group_id).await {
            Ok(permissions) => permissions,
            Err(e) => {
                self.inner.policy.swallow(FailureStage::GroupPermissions, &e);
                Vec::new()
            }
        }
    }
}

impl ManagerInner {
    /// Apply `f` to a copy of the snapshot and publish it if `f` returns true,
    /// then notify subscribers outside the write lock
    fn mutate_if(&self, f: impl FnOnce(&mut SyncSnapshot) -> bool) -> bool {
        let applied = {
            let _guard = self.write.lock();
            let mut next = SyncSnapshot::clone(&self.snapshot.load());
            let applied = f(&mut next);
            if applied {
                self.snapshot.store(Arc::new(next));
            }
            applied
        };
        if applied {
            self.subscribers.notify();
        }
        applied
    }

    fn mutate(&self, f: impl FnOnce(&mut SyncSnapshot)) {
        self.mutate_if(|s| {
            f(s);
            true
        });
    }

    fn initialize(self: &Arc<Self>, token: &str) {
        if token.is_empty() {
            self.policy.swallow(FailureStage::Setup, &SyncError::MissingToken);
            if !self.snapshot.load().has_initial_load {
                self.mutate(|s| s.is_loading = false);
            }
            return;
        }

        let (epoch, previous, new_owner) = {
            let mut session = self.session.lock();
            if session.initialized && session.token.as_deref() == Some(token) {
                tracing::debug!("sync manager already initialized for this session");
                return;
            }
            let previous = session.token.replace(token.to_string());
            let switched = session.initialized;
            let new_owner = session.owner.as_deref().is_some_and(|owner| owner != token);
            session.owner = Some(token.to_string());
            session.epoch += 1;
            session.initialized = true;
            session.connects = 0;
            (session.epoch, previous.filter(|_| switched), new_owner)
        };

        self.cancel_reconcile();
        if let Some(previous) = previous {
            tracing::info!("session token changed; tearing down previous connection");
            self.transport.disconnect();
            self.source.forget(&previous);
        }
        if new_owner {
            // Stale-but-present holds within a session only; start the new one deny-all
            self.mutate(|s| s.reset_for_new_session());
        }
        self.debounce.reset();

        if !self.snapshot.load().has_initial_load {
            self.mutate(|s| s.is_loading = true);
        }

        tracing::info!("initializing permission sync (session {})", epoch);
        let this = Arc::clone(self);
        let owned = token.to_string();
        tokio::spawn(async move {
            let started = this.push_epoch.load(Ordering::SeqCst);
            let result = this.source.load(&owned).await;
            this.settle_fetch(result, epoch, started, FailureStage::InitialLoad);
        });

        self.transport.connect(token);
    }

    fn cleanup(&self) {
        let previous = {
            let mut session = self.session.lock();
            session.epoch += 1;
            session.initialized = false;
            session.connects = 0;
            session.token.take()
        };
        self.cancel_reconcile();
        self.transport.disconnect();
        if let Some(previous) = previous {
            self.source.forget(&previous);
        }
        // A pending first load was just orphaned; stop the spinner
        self.mutate_if(|s| std::mem::replace(&mut s.is_loading, false));
        tracing::info!("permission sync cleaned up");
    }

    /// Debounced refresh; a call inside the window is dropped
    fn request_refresh(self: &Arc<Self>) {
        self.refresh(false);
    }

    /// Refresh owed to the server after a pushed payload. Inside the debounce
    /// window it is deferred to the end of the window instead of dropped.
    fn request_reconcile(self: &Arc<Self>) {
        self.reconcile_owed
            .fetch_max(self.push_epoch.load(Ordering::SeqCst), Ordering::SeqCst);
        self.refresh(true);
    }

    fn refresh(self: &Arc<Self>, owed: bool) {
        let (token, epoch) = {
            let session = self.session.lock();
            match (&session.token, session.initialized) {
                (Some(token), true) => (token.clone(), session.epoch),
                _ => {
                    tracing::debug!("refresh skipped: no active session");
                    return;
                }
            }
        };
        if !self.debounce.try_acquire() {
            if owed {
                tracing::debug!("reconcile deferred to the end of the debounce window");
                self.arm_trailing();
            } else {
                tracing::debug!("refresh suppressed by debounce window");
            }
            return;
        }

        let started = self.push_epoch.load(Ordering::SeqCst);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.source.refetch(&token).await;
            this.settle_fetch(result, epoch, started, FailureStage::BackgroundRefresh);
        });
    }

    fn arm_trailing(self: &Arc<Self>) {
        let mut trailing = self.trailing.lock();
        if trailing.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let wait = self.debounce.remaining();
        let weak = Arc::downgrade(self);
        *trailing = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.trailing.lock().take();
            if inner.reconcile_owed.load(Ordering::SeqCst) != 0 {
                inner.refresh(true);
            }
        }));
    }

    fn cancel_reconcile(&self) {
        self.reconcile_owed.store(0, Ordering::SeqCst);
        if let Some(timer) = self.trailing.lock().take() {
            timer.abort();
        }
    }

    /// Apply a fetch result unless it belongs to an older session or was
    /// overtaken by a pushed update. Failures keep the current snapshot.
    fn settle_fetch(
        self: &Arc<Self>,
        result: Result<UserPermissions, SyncError>,
        epoch: u64,
        started: u64,
        stage: FailureStage,
    ) {
        match result {
            Ok(update) => {
                let mut overtaken = false;
                let applied = self.mutate_if(|s| {
                    if self.session.lock().epoch != epoch {
                        tracing::debug!("discarding {} result from a previous session", stage);
                        return false;
                    }
                    if self.push_epoch.load(Ordering::SeqCst) != started {
                        tracing::debug!("discarding {} result overtaken by a pushed update", stage);
                        overtaken = true;
                        return false;
                    }
                    s.apply(update);
                    true
                });
                if applied {
                    tracing::debug!("{} applied", stage);
                    let owed = self.reconcile_owed.load(Ordering::SeqCst);
                    if owed != 0 && started >= owed {
                        let _ = self
                            .reconcile_owed
                            .compare_exchange(owed, 0, Ordering::SeqCst, Ordering::SeqCst);
                    }
                }
                if overtaken {
                    self.request_reconcile();
                }
            }
            Err(e) => {
                self.policy.swallow(stage, &e);
                self.mutate_if(|s| {
                    if s.has_initial_load || self.session.lock().epoch != epoch {
                        return false;
                    }
                    // First load failed with nothing to keep: fall back to deny-all
                    s.mark_loaded();
                    true
                });
            }
        }
    }

    fn apply_push(&self, permissions: Option<Vec<Permission>>, groups: Option<Vec<Group>>) {
        self.mutate(|s| {
            self.push_epoch.fetch_add(1, Ordering::SeqCst);
            if let Some(permissions) = permissions {
                s.set_permissions(permissions);
            }
            if let Some(groups) = groups {
                s.groups = groups;
            }
            s.mark_loaded();
        });
    }

    fn mirror_connection(&self) {
        let status = self.transport.status();
        self.mutate_if(|s| {
            if s.connection == status.state && s.reconnect_attempts == status.reconnect_attempts {
                return false;
            }
            s.connection = status.state;
            s.reconnect_attempts = status.reconnect_attempts;
            true
        });
    }

    fn connected(self: &Arc<Self>) {
        let reconnected = {
            let mut session = self.session.lock();
            session.connects += 1;
            session.initialized && session.connects > 1
        };
        // Events may have been missed while the socket was down
        if reconnected {
            self.request_refresh();
        }
    }
}
