use std::time::Duration;

use crate::cli::utils::{format_snapshot, output_success};
use crate::cli::OutputFormat;
use crate::config::config;
use crate::sync::PermissionSyncManager;

pub async fn handle(token: &str, duration: Option<u64>, output_format: OutputFormat) -> anyhow::Result<()> {
    let manager = PermissionSyncManager::from_config(config())?;

    let reader = manager.clone();
    let subscription = manager.subscribe(move || {
        let snapshot = reader.snapshot();
        match output_format {
            OutputFormat::Json => match serde_json::to_string(&*snapshot) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("failed to encode snapshot: {}", e),
            },
            OutputFormat::Text => println!("{}", format_snapshot(&snapshot)),
        }
    });

    manager.initialize(token).await;

    let limit = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = limit => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    subscription.unsubscribe();
    manager.cleanup();

    let snapshot = manager.snapshot();
    output_success(
        &output_format,
        &format!("Stopped watching with {} permissions", snapshot.permissions.len()),
        Some(serde_json::json!({ "snapshot": &*snapshot })),
    )
}
