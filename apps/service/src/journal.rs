//! Append-only log file fed from the event bus.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::monitoring::MonitorEvent;

pub fn format_line(at: DateTime<Local>, text: &str) -> String {
    format!("[{}] {}\n", at.format("%Y-%m-%d %H:%M:%S"), text)
}

async fn append(path: &Path, line: &str) -> std::io::Result<()> {
    // reopened per line so external rotation just works
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

/// Drain log events into `path` until the bus closes
pub fn spawn_journal(mut rx: broadcast::Receiver<MonitorEvent>, path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %path.display(), error = %e, "Failed to create journal directory");
            }
        }

        loop {
            let line = match rx.recv().await {
                Ok(MonitorEvent::Log(log)) => format_line(log.timestamp, &log.text),
                Ok(MonitorEvent::Status(_)) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    format_line(Local::now(), &format!("journal skipped {skipped} events"))
                }
                Err(RecvError::Closed) => break,
            };

            if let Err(e) = append(&path, &line).await {
                warn!(path = %path.display(), error = %e, "Failed to write journal");
            }
        }

        debug!("Journal closed");
    })
}
