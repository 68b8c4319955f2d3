use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::types::{ConnectionState, Group, Permission, UserPermissions};

/// Anything `has_permission` can be asked about: one codename or a list
/// of alternatives (any match wins).
pub trait PermissionQuery {
    fn any_held(&self, held: &HashSet<String>) -> bool;
}

impl PermissionQuery for str {
    fn any_held(&self, held: &HashSet<String>) -> bool {
        held.contains(self)
    }
}

impl PermissionQuery for String {
    fn any_held(&self, held: &HashSet<String>) -> bool {
        held.contains(self.as_str())
    }
}

impl<T: AsRef<str>> PermissionQuery for [T] {
    fn any_held(&self, held: &HashSet<String>) -> bool {
        self.iter().any(|c| held.contains(c.as_ref()))
    }
}

impl<T: AsRef<str>> PermissionQuery for Vec<T> {
    fn any_held(&self, held: &HashSet<String>) -> bool {
        self.as_slice().any_held(held)
    }
}

impl<T: AsRef<str>, const N: usize> PermissionQuery for [T; N] {
    fn any_held(&self, held: &HashSet<String>) -> bool {
        self.as_slice().any_held(held)
    }
}

/// Immutable view of the sync manager's state. A new snapshot replaces the
/// old one on every mutation; readers never observe a partial update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSnapshot {
    pub permissions: Vec<Permission>,
    pub groups: Vec<Group>,
    pub last_update: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub has_initial_load: bool,
    pub is_loading: bool,
    pub connection: ConnectionState,
    #[serde(skip)]
    codenames: HashSet<String>,
}

impl SyncSnapshot {
    pub fn has_permission<Q: PermissionQuery + ?Sized>(&self, query: &Q, is_superuser: bool) -> bool {
        is_superuser || query.any_held(&self.codenames)
    }

    pub fn has_all_permissions<T: AsRef<str>>(&self, codenames: &[T], is_superuser: bool) -> bool {
        is_superuser || codenames.iter().all(|c| self.codenames.contains(c.as_ref()))
    }

    pub fn permissions_for_model(&self, app_label: &str, model: &str) -> Vec<Permission> {
        self.permissions
            .iter()
            .filter(|p| p.content_type.as_ref().is_some_and(|ct| ct.matches(app_label, model)))
            .cloned()
            .collect()
    }

    pub fn codenames(&self) -> impl Iterator<Item = &str> {
        self.codenames.iter().map(String::as_str)
    }

    pub(crate) fn set_permissions(&mut self, permissions: Vec<Permission>) {
        self.codenames = permissions.iter().map(|p| p.codename.clone()).collect();
        self.permissions = permissions;
    }

    /// Replace permissions and groups wholesale and mark the first load done
    pub(crate) fn apply(&mut self, update: UserPermissions) {
        self.set_permissions(update.direct_permissions);
        self.groups = update.groups;
        self.mark_loaded();
    }

    /// Drop everything a previous user's session loaded; the connection mirror stays
    pub(crate) fn reset_for_new_session(&mut self) {
        *self = SyncSnapshot {
            is_loading: true,
            connection: self.connection,
            reconnect_attempts: self.reconnect_attempts,
            ..SyncSnapshot::default()
        };
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.last_update = Some(Utc::now());
        self.has_initial_load = true;
        self.is_loading = false;
    }
}
