//! Disk headroom checks before persisting artifacts.

use crate::error::VoiceError;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Multiple of the payload size that must be free before a write.
pub const HEADROOM_FACTOR: u64 = 2;

/// Source of free-space figures for a directory.
pub trait FreeSpace: Send + Sync {
    fn available(&self, dir: &Path) -> io::Result<u64>;
}

/// Queries the filesystem holding the directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFreeSpace;

impl FreeSpace for SystemFreeSpace {
    fn available(&self, dir: &Path) -> io::Result<u64> {
        fs2::available_space(dir)
    }
}

/// Advisory pre-flight check run before an artifact is written to storage.
///
/// The check and the subsequent write are not atomic; a concurrent writer
/// may still exhaust the volume in between.
#[derive(Clone)]
pub struct ResourceGuard {
    probe: Arc<dyn FreeSpace>,
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard").finish_non_exhaustive()
    }
}

impl Default for ResourceGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::with_probe(SystemFreeSpace)
    }

    pub fn with_probe(probe: impl FreeSpace + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
        }
    }

    /// Fails with a transient error unless `target_dir` has at least twice
    /// `payload_size` bytes free.
    pub fn check_headroom(&self, target_dir: &Path, payload_size: u64) -> Result<(), VoiceError> {
        let available = self.probe.available(target_dir)?;
        let required = payload_size.saturating_mul(HEADROOM_FACTOR);
        if available < required {
            tracing::warn!(
                path = %target_dir.display(),
                available,
                required,
                "insufficient disk headroom"
            );
            return Err(VoiceError::InsufficientHeadroom {
                dir: target_dir.to_path_buf(),
                available,
                required,
            });
        }
        Ok(())
    }
}
