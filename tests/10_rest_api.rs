mod common;

use anyhow::Result;
use serde_json::json;

use permsync::api::{HttpPermissionsApi, PermissionsApi};
use permsync::SyncError;

#[tokio::test]
async fn loads_permissions_with_bearer_token() -> Result<()> {
    let server = common::TestServer::start().await?;
    server.set_user("abc", &["view_property", "edit_property"], json!([{"id": 1, "name": "Staff"}]));
    let api = HttpPermissionsApi::new(&server.api_config())?;

    let perms = api.current_user_permissions("abc").await?;
    let codenames: Vec<&str> = perms.codenames().collect();
    assert_eq!(codenames, vec!["view_property", "edit_property"]);
    assert_eq!(perms.groups[0].name, "Staff");
    let ct = perms.direct_permissions[0].content_type.as_ref().unwrap();
    assert!(ct.matches("properties", "property"));
    assert_eq!(server.rest_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_token_is_an_api_error() -> Result<()> {
    let server = common::TestServer::start().await?;
    let api = HttpPermissionsApi::new(&server.api_config())?;

    let err = api.current_user_permissions("nope").await.unwrap_err();
    assert_eq!(err, SyncError::api(401, "Invalid token"));
    Ok(())
}

#[tokio::test]
async fn empty_token_never_reaches_the_server() -> Result<()> {
    let server = common::TestServer::start().await?;
    let api = HttpPermissionsApi::new(&server.api_config())?;

    assert_eq!(api.current_user_permissions("").await.unwrap_err(), SyncError::MissingToken);
    assert_eq!(server.rest_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn group_permissions_endpoint() -> Result<()> {
    let server = common::TestServer::start().await?;
    server.set_user("abc", &["view_property"], json!([]));
    let api = HttpPermissionsApi::new(&server.api_config())?;

    let perms = api.group_permissions("abc", 1).await?;
    assert_eq!(perms.len(), 2);
    assert_eq!(perms[1].codename, "view_owner");

    let err = api.group_permissions("abc", 9).await.unwrap_err();
    assert_eq!(err, SyncError::api(404, "Group not found"));
    Ok(())
}
