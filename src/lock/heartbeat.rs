//! Periodic refresh of an owned lock.
//!
//! Keeps the record's acquisition time fresh so peers never time out a
//! live owner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::LockFileManager;

/// Spawn the heartbeat task for `path`.
///
/// Runs until `cancel` fires or the lock turns out to be lost. Losing the
/// lock cancels `lost` so the owner can shut down.
#[must_use]
pub fn spawn_heartbeat(
    manager: Arc<LockFileManager>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
    lost: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the lock was just written.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(path = %path.display(), "lock heartbeat shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match manager.refresh_lock(&path).await {
                        Ok(true) => {}
                        Ok(false) => {
                            error!(path = %path.display(), "lock ownership lost");
                            lost.cancel();
                            break;
                        }
                        Err(err) => {
                            error!(?err, path = %path.display(), "lock heartbeat failed");
                        }
                    }
                }
            }
        }
    })
}
