use serde_json::json;

use crate::api::{HttpPermissionsApi, PermissionsApi};
use crate::cli::OutputFormat;
use crate::config::config;
use crate::sync::state::SyncSnapshot;

pub async fn handle(token: &str, codenames: &[String], superuser: bool, output_format: OutputFormat) -> anyhow::Result<()> {
    let api = HttpPermissionsApi::new(&config().api)?;
    let permissions = api.current_user_permissions(token).await?;

    let mut snapshot = SyncSnapshot::default();
    snapshot.apply(permissions);

    let results: Vec<(&str, bool)> = codenames
        .iter()
        .map(|c| (c.as_str(), snapshot.has_permission(c.as_str(), superuser)))
        .collect();
    let all_held = results.iter().all(|(_, held)| *held);

    match output_format {
        OutputFormat::Json => {
            let checks: serde_json::Map<String, serde_json::Value> =
                results.iter().map(|(c, held)| (c.to_string(), json!(held))).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "superuser": superuser,
                    "all_held": all_held,
                    "checks": checks,
                }))?
            );
        }
        OutputFormat::Text => {
            for (codename, held) in &results {
                println!("{} {}", if *held { "✓" } else { "✗" }, codename);
            }
        }
    }

    if !all_held {
        anyhow::bail!("{} of {} permissions not held", results.iter().filter(|(_, h)| !h).count(), results.len());
    }
    Ok(())
}
