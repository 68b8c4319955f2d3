pub mod query;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::api::PermissionsApi;
use crate::error::SyncError;
use crate::types::{Permission, UserPermissions};

pub use query::QueryCache;

/// Where the sync manager gets permission sets from
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Cache-first load
    async fn load(&self, token: &str) -> Result<UserPermissions, SyncError>;

    /// Invalidate, then load from the backend
    async fn refetch(&self, token: &str) -> Result<UserPermissions, SyncError>;

    /// Permissions bundled by one group (display only)
    async fn group_permissions(&self, token: &str, group_id: i64) -> Result<Vec<Permission>, SyncError>;

    /// Release anything held for a session that has ended
    fn forget(&self, _token: &str) {}
}

/// `PermissionSource` backed by a `QueryCache` in front of the REST API.
/// Entries are keyed by token so one session never reads another's set.
pub struct CachedPermissionSource {
    api: Arc<dyn PermissionsApi>,
    cache: QueryCache<UserPermissions>,
    groups: QueryCache<Vec<Permission>>,
}

impl CachedPermissionSource {
    pub fn new(api: Arc<dyn PermissionsApi>, stale_time: Duration) -> Self {
        Self {
            api,
            cache: QueryCache::new(stale_time),
            groups: QueryCache::new(stale_time),
        }
    }

    fn key(token: &str) -> String {
        format!("user-permissions:{}", token)
    }

    fn group_key(token: &str, group_id: i64) -> String {
        format!("group-permissions:{}:{}", token, group_id)
    }

    /// Entries held across both caches
    pub fn len(&self) -> usize {
        self.cache.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cached(&self, token: &str) -> Option<UserPermissions> {
        self.cache.peek(&Self::key(token))
    }

    fn fetcher(
        &self,
        token: &str,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<UserPermissions, SyncError>> {
        let api = Arc::clone(&self.api);
        let token = token.to_string();
        move || Box::pin(async move { api.current_user_permissions(&token).await })
    }
}

#[async_trait]
impl PermissionSource for CachedPermissionSource {
    async fn load(&self, token: &str) -> Result<UserPermissions, SyncError> {
        self.cache.fetch(&Self::key(token), self.fetcher(token)).await
    }

    async fn refetch(&self, token: &str) -> Result<UserPermissions, SyncError> {
        self.cache.refetch(&Self::key(token), self.fetcher(token)).await
    }

    async fn group_permissions(&self, token: &str, group_id: i64) -> Result<Vec<Permission>, SyncError> {
        let api = Arc::clone(&self.api);
        let owned = token.to_string();
        let key = Self::group_key(token, group_id);
        self.groups
            .fetch(&key, move || {
                Box::pin(async move { api.group_permissions(&owned, group_id).await })
                    as futures::future::BoxFuture<'static, _>
            })
            .await
    }

    fn forget(&self, token: &str) {
        self.cache.invalidate(&Self::key(token));
        let prefix = format!("group-permissions:{}:", token);
        self.groups.invalidate_where(|key| key.starts_with(&prefix));
        tracing::debug!("released cached permissions for an ended session");
    }
}
