//! xcast-send - Dispatch trigger daemon
//!
//! Periodically triggers a dispatch pass on the xcast server, which publishes
//! due scheduled posts.

use clap::Parser;
use libxcast::logging::{LogFormat, LoggingConfig};
use libxcast::{DispatchSummary, Result, XcastError};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "xcast-send")]
#[command(version)]
#[command(about = "Dispatch trigger daemon for scheduled posting")]
#[command(long_about = "\
xcast-send - Dispatch trigger daemon

DESCRIPTION:
    xcast-send is a long-running daemon that triggers dispatch passes on an
    xcast server at a fixed interval. Each pass publishes scheduled posts
    that are due, refreshing expired credentials as needed.

    The trigger call presents a shared secret; a server without the matching
    key rejects the pass before touching any data.

USAGE:
    # Run in foreground (logs to stderr)
    xcast-send --api-key <KEY>

    # Run with custom trigger interval
    xcast-send --interval 60 --api-key <KEY>

    # Trigger one pass and exit
    xcast-send --once --api-key <KEY>

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes current trigger)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Seconds between dispatch triggers
    #[arg(long, value_name = "SECONDS", default_value_t = 300)]
    #[arg(help = "How often to trigger a dispatch pass (default: 300)")]
    interval: u64,

    /// Dispatch endpoint of the xcast server
    #[arg(long, value_name = "URL", default_value = "http://localhost:8080/api/cron-webhook")]
    endpoint: String,

    /// Shared secret expected by the dispatch endpoint
    #[arg(long, env = "XCAST_API_KEY", value_name = "KEY")]
    api_key: String,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Trigger once and exit (for testing)
    #[arg(long)]
    #[arg(help = "Trigger one dispatch pass and exit")]
    once: bool,
}

/// Envelope returned by the dispatch endpoint
#[derive(Debug, Deserialize)]
struct TriggerResponse {
    success: bool,
    message: Option<String>,
    data: Option<DispatchSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    LoggingConfig::new(LogFormat::Text, level.to_string(), cli.verbose).init();

    info!("xcast-send daemon starting");
    info!("Trigger interval: {}s, endpoint: {}", cli.interval, cli.endpoint);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| XcastError::InvalidInput(format!("Failed to build HTTP client: {}", e)))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    if cli.once {
        trigger_dispatch(&client, &cli.endpoint, &cli.api_key).await?;
        info!("xcast-send: triggered one pass, exiting");
    } else {
        run_daemon_loop(&client, &cli, shutdown).await;
    }

    info!("xcast-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| XcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}

/// Main daemon loop
///
/// A failed trigger is logged and retried on the next tick; it never kills
/// the daemon.
async fn run_daemon_loop(client: &reqwest::Client, cli: &Cli, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = trigger_dispatch(client, &cli.endpoint, &cli.api_key).await {
            error!("Dispatch trigger failed: {}", e);
        }

        // Sleep until next trigger (check shutdown every second)
        for _ in 0..cli.interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Trigger one dispatch pass and log its summary
async fn trigger_dispatch(client: &reqwest::Client, endpoint: &str, api_key: &str) -> Result<()> {
    let response = client
        .get(endpoint)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|e| {
            XcastError::Platform(libxcast::error::PlatformError::Network(format!(
                "Trigger request failed: {}",
                e
            )))
        })?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(XcastError::Unauthorized(
            "Dispatch endpoint rejected the shared secret".to_string(),
        ));
    }
    if !status.is_success() {
        return Err(XcastError::Platform(libxcast::error::PlatformError::Network(
            format!("Dispatch endpoint returned {}", status),
        )));
    }

    let body: TriggerResponse = response.json().await.map_err(|e| {
        XcastError::Platform(libxcast::error::PlatformError::Network(format!(
            "Malformed trigger response: {}",
            e
        )))
    })?;

    if !body.success {
        warn!(
            "Dispatch pass reported failure: {}",
            body.message.unwrap_or_default()
        );
        return Ok(());
    }

    match body.data {
        Some(summary) if summary.total > 0 => {
            info!(
                total = summary.total,
                posted = summary.posted,
                failed = summary.failed,
                "Dispatch pass complete"
            );
            for failure in &summary.errors {
                warn!(post_id = %failure.post_id, reason = %failure.reason, "Post failed");
            }
        }
        _ => info!("No posts due"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["xcast-send", "--api-key", "k"]).unwrap();
        assert_eq!(cli.interval, 300);
        assert_eq!(cli.endpoint, "http://localhost:8080/api/cron-webhook");
        assert!(!cli.once);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_requires_api_key() {
        // No flag and no XCAST_API_KEY in the test environment
        std::env::remove_var("XCAST_API_KEY");
        assert!(Cli::try_parse_from(["xcast-send"]).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "xcast-send",
            "--interval",
            "60",
            "--endpoint",
            "http://example.com/hook",
            "--api-key",
            "k",
            "--once",
        ])
        .unwrap();
        assert_eq!(cli.interval, 60);
        assert_eq!(cli.endpoint, "http://example.com/hook");
        assert!(cli.once);
    }

    #[test]
    fn test_trigger_response_parsing() {
        let json = r#"{
            "success": true,
            "data": { "total": 2, "posted": 1, "failed": 1,
                      "errors": [{ "post_id": "p1", "reason": "User not found" }] }
        }"#;
        let response: TriggerResponse = serde_json::from_str(json).unwrap();

        assert!(response.success);
        let summary = response.data.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.errors[0].post_id, "p1");
    }

    #[test]
    fn test_trigger_response_empty_window() {
        let json = r#"{
            "success": true,
            "message": "No posts due in this window",
            "data": { "total": 0, "posted": 0, "failed": 0, "errors": [] }
        }"#;
        let response: TriggerResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.message.as_deref(), Some("No posts due in this window"));
        assert_eq!(response.data.unwrap().total, 0);
    }
}
