// REST client for the permission endpoints

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ErrorBody, SyncError};
use crate::types::{Permission, UserPermissions};

/// Read-only view of the backend used by the cache layer
#[async_trait]
pub trait PermissionsApi: Send + Sync {
    /// Effective permissions and groups of the token's user
    async fn current_user_permissions(&self, token: &str) -> Result<UserPermissions, SyncError>;

    /// Permissions bundled by one group, for display
    async fn group_permissions(&self, token: &str, group_id: i64) -> Result<Vec<Permission>, SyncError>;
}

/// `{ "error": false, "data": ... }` envelope wrapping successful responses
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// Decode a response body, mapping error-shaped envelopes to `SyncError::Api`
pub fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, SyncError> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => {
            return Err(SyncError::api(status.as_u16(), status.canonical_reason().unwrap_or("request failed")));
        }
        Err(e) => return Err(e.into()),
    };

    let is_error = value.get("error").and_then(Value::as_bool).unwrap_or(false);
    if is_error || !status.is_success() {
        let body: ErrorBody = serde_json::from_value(value).unwrap_or_default();
        return Err(body.into_error(status.as_u16()));
    }

    let envelope: Envelope<T> = serde_json::from_value(value)?;
    match envelope.data {
        Some(data) if !envelope.error => Ok(data),
        _ => Err(SyncError::api(
            status.as_u16(),
            envelope.message.unwrap_or_else(|| "response carried no data".to_string()),
        )),
    }
}

/// reqwest-backed implementation using bearer authentication
#[derive(Debug, Clone)]
pub struct HttpPermissionsApi {
    client: Client,
    base_url: Url,
    permissions_path: String,
    group_permissions_path: String,
}

#[derive(Debug, Deserialize)]
struct GroupPermissions {
    #[serde(default)]
    permissions: Vec<Permission>,
}

impl HttpPermissionsApi {
    pub fn new(config: &ApiConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(SyncError::from)?;
        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            permissions_path: config.permissions_path.clone(),
            group_permissions_path: config.group_permissions_path.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, token: &str, path: &str) -> Result<T, SyncError> {
        if token.is_empty() {
            return Err(SyncError::MissingToken);
        }
        let url = self.endpoint(path)?;
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }
}

#[async_trait]
impl PermissionsApi for HttpPermissionsApi {
    async fn current_user_permissions(&self, token: &str) -> Result<UserPermissions, SyncError> {
        self.get(token, &self.permissions_path).await
    }

    async fn group_permissions(&self, token: &str, group_id: i64) -> Result<Vec<Permission>, SyncError> {
        let path = self.group_permissions_path.replace("{id}", &group_id.to_string());
        let group: GroupPermissions = self.get(token, &path).await?;
        Ok(group.permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_success_envelope() {
        let body = r#"{"error": false, "data": {"direct_permissions": [{"id": 1, "codename": "view_x"}], "groups": []}}"#;
        let perms: UserPermissions = decode_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(perms.direct_permissions[0].codename, "view_x");
    }

    #[test]
    fn error_envelope_with_ok_status_is_an_error() {
        let body = r#"{"error": true, "message": "session expired"}"#;
        let err = decode_envelope::<UserPermissions>(StatusCode::OK, body).unwrap_err();
        assert_eq!(err, SyncError::api(200, "session expired"));
    }

    #[test]
    fn non_success_status_without_json() {
        let err = decode_envelope::<UserPermissions>(StatusCode::BAD_GATEWAY, "<html>").unwrap_err();
        assert_eq!(err, SyncError::api(502, "Bad Gateway"));
    }

    #[test]
    fn missing_data_is_an_error() {
        let err = decode_envelope::<UserPermissions>(StatusCode::OK, r#"{"error": false}"#).unwrap_err();
        assert!(matches!(err, SyncError::Api { status: 200, .. }));
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let err = decode_envelope::<UserPermissions>(StatusCode::OK, "nope").unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn endpoint_joins_configured_path() {
        let api = HttpPermissionsApi::new(&crate::config::AppConfig::development().api).unwrap();
        let url = api.endpoint("/api/groups/3/permissions/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/groups/3/permissions/");
    }
}
