//! Herald notification relay.
//!
//! Reads portal events as JSON lines on stdin and delivers each through the
//! notifier, writing one delivery result per line to stdout. Logs go to
//! stderr. Open threads are restored from and saved to the snapshot file
//! named by `HERALD_THREAD_SNAPSHOT`, so conversations survive restarts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use herald_core::Event;
use herald_delivery::{Notifier, NotifierConfig};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

/// Environment variable naming the thread snapshot file.
const SNAPSHOT_ENV: &str = "HERALD_THREAD_SNAPSHOT";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting herald notification relay");

    let config = NotifierConfig::load()?;
    let notifier = Notifier::new(config).context("failed to build notifier")?;

    let snapshot_path = std::env::var_os(SNAPSHOT_ENV).map(PathBuf::from);
    if let Some(path) = &snapshot_path {
        restore_threads(&notifier, path).await?;
    }

    let connection = notifier.test_connection().await;
    if connection.ok {
        info!(detail = %connection.detail, "Chat connection verified");
    } else {
        warn!(
            detail = %connection.detail,
            error_code = connection.error_code.as_deref().unwrap_or(""),
            "Chat connection check failed, continuing"
        );
    }

    tokio::select! {
        result = relay_events(&notifier) => {
            result?;
            info!("Input closed");
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    if let Some(path) = &snapshot_path {
        save_threads(&notifier, path).await?;
    }

    let status = notifier.status().await;
    info!(
        status = %serde_json::to_string(&status).unwrap_or_default(),
        "Herald shutdown complete"
    );
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,herald=debug,herald_delivery=debug"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Delivers each stdin line until EOF.
///
/// Malformed lines are logged and skipped; they never stop the relay.
async fn relay_events(notifier: &Notifier) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<Value>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|value| Event::from_json(&value).map_err(anyhow::Error::from))
        {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event");
                continue;
            },
        };

        let result = notifier.notify(&event).await;
        let mut output = serde_json::to_vec(&result).context("failed to encode result")?;
        output.push(b'\n');
        stdout.write_all(&output).await.context("failed to write result")?;
        stdout.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}

async fn restore_threads(notifier: &Notifier, path: &Path) -> Result<()> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No thread snapshot yet");
            return Ok(());
        },
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        },
    };

    match notifier.load_threads_json(&raw).await {
        Ok(count) => info!(count, path = %path.display(), "Restored threads"),
        Err(e) => error!(error = %e, path = %path.display(), "Ignoring unreadable thread snapshot"),
    }
    Ok(())
}

async fn save_threads(notifier: &Notifier, path: &Path) -> Result<()> {
    let snapshot = notifier.thread_snapshot().await;
    let raw = serde_json::to_string_pretty(&snapshot).context("failed to encode threads")?;
    tokio::fs::write(path, raw)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(count = snapshot.len(), path = %path.display(), "Saved threads");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
