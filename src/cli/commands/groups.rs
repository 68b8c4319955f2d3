use serde_json::json;

use crate::api::{HttpPermissionsApi, PermissionsApi};
use crate::cli::utils::{format_permission, output_empty_collection};
use crate::cli::OutputFormat;
use crate::config::config;

pub async fn handle(token: &str, group_id: Option<i64>, output_format: OutputFormat) -> anyhow::Result<()> {
    let api = HttpPermissionsApi::new(&config().api)?;

    match group_id {
        None => {
            let groups = api.current_user_permissions(token).await?.groups;
            if groups.is_empty() {
                return output_empty_collection(&output_format, "groups", "No groups assigned");
            }
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({ "groups": groups }))?),
                OutputFormat::Text => {
                    for group in &groups {
                        println!("{:>6}  {}", group.id, group.name);
                    }
                }
            }
        }
        Some(id) => {
            let permissions = api.group_permissions(token, id).await?;
            if permissions.is_empty() {
                return output_empty_collection(&output_format, "permissions", &format!("Group {} grants no permissions", id));
            }
            match output_format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "group_id": id, "permissions": permissions }))?
                ),
                OutputFormat::Text => {
                    for permission in &permissions {
                        println!("{}", format_permission(permission));
                    }
                }
            }
        }
    }
    Ok(())
}
