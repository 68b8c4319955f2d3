use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::sync::state::SyncSnapshot;
use crate::types::Permission;

/// Output a success message in the appropriate format
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(target), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(output_format: &OutputFormat, collection_name: &str, message: &str) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    collection_name: []
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// One line per permission: codename, name and model scope when present
pub fn format_permission(permission: &Permission) -> String {
    match &permission.content_type {
        Some(ct) => format!("{:<32} {} ({}.{})", permission.codename, permission.name, ct.app_label, ct.model),
        None => format!("{:<32} {}", permission.codename, permission.name),
    }
}

/// Compact one-line summary of a sync snapshot
pub fn format_snapshot(snapshot: &SyncSnapshot) -> String {
    let updated = snapshot
        .last_update
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let mut line = format!(
        "[{}] {} permissions, {} groups, updated {}",
        snapshot.connection,
        snapshot.permissions.len(),
        snapshot.groups.len(),
        updated
    );
    if snapshot.is_loading {
        line.push_str(", loading");
    }
    if snapshot.reconnect_attempts > 0 {
        line.push_str(&format!(", reconnect attempt {}", snapshot.reconnect_attempts));
    }
    line
}
