use crate::cli::OutputFormat;
use crate::config::config;

pub fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let config = config();
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            println!("Environment:        {:?}", config.environment);
            println!("API base URL:       {}", config.api.base_url);
            println!("Permissions path:   {}", config.api.permissions_path);
            println!("Group path:         {}", config.api.group_permissions_path);
            println!("Request timeout:    {}s", config.api.request_timeout_secs);
            println!("WebSocket URL:      {}", config.websocket.url);
            println!("Heartbeat:          {}s", config.websocket.heartbeat_interval_secs);
            println!(
                "Reconnect:          {}ms doubling to {}ms, {} attempts",
                config.websocket.reconnect_initial_delay_ms,
                config.websocket.reconnect_max_delay_ms,
                config.websocket.reconnect_max_attempts
            );
            println!("Auth close code:    {}", config.websocket.auth_rejected_close_code);
            println!("Refresh debounce:   {}ms", config.sync.refresh_debounce_ms);
            println!("Cache stale time:   {}s", config.sync.cache_stale_secs);
        }
    }
    Ok(())
}
