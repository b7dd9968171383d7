//! Deferred, best-effort deletion of produced artifacts.

use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Deletes files after an exposure window.
///
/// Deletion failures are logged and swallowed; nothing is retried.
#[derive(Debug, Clone, Copy)]
pub struct TempFileJanitor {
    default_delay: Duration,
}

impl Default for TempFileJanitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TempFileJanitor {
    pub fn new(default_delay: Duration) -> Self {
        Self { default_delay }
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Deletes `path` once `delay` has elapsed, if it still exists then.
    ///
    /// Must be called from within a tokio runtime. The returned handle may
    /// be dropped; the deletion still runs.
    pub fn schedule_delete(&self, path: impl Into<PathBuf>, delay: Duration) -> JoinHandle<()> {
        let path = path.into();
        tracing::debug!(path = %path.display(), delay_secs = delay.as_secs(), "scheduled artifact deletion");
        tokio::spawn(async move {
            sleep(delay).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!(path = %path.display(), "deleted expired artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "artifact already gone")
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to delete artifact")
                }
            }
        })
    }

    /// Schedules deletion after the default delay.
    pub fn schedule_default(&self, path: impl Into<PathBuf>) -> JoinHandle<()> {
        self.schedule_delete(path, self.default_delay)
    }
}
