//! Shared types used across the codebase

use serde::{Deserialize, Serialize};

/// (app label, model) pair scoping what a permission governs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentType {
    pub app_label: String,
    pub model: String,
}

impl ContentType {
    pub fn new(app_label: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model: model.into(),
        }
    }

    pub fn matches(&self, app_label: &str, model: &str) -> bool {
        self.app_label == app_label && self.model == model
    }
}

/// A single permission as delivered by the backend.
/// Never mutated after decode; refreshes replace the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub codename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
}

impl Permission {
    pub fn new(id: i64, name: impl Into<String>, codename: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            codename: codename.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

impl Group {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// Effective permission set for the current user.
/// The REST endpoint names the list `direct_permissions`, pushes name it `permissions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    #[serde(default, alias = "permissions")]
    pub direct_permissions: Vec<Permission>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl UserPermissions {
    pub fn new(direct_permissions: Vec<Permission>, groups: Vec<Group>) -> Self {
        Self { direct_permissions, groups }
    }

    pub fn codenames(&self) -> impl Iterator<Item = &str> {
        self.direct_permissions.iter().map(|p| p.codename.as_str())
    }
}

/// Externally visible connection state. Socket errors collapse into `Disconnected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}
