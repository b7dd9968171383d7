//! Concrete engines behind the capability traits in [`crate::engine`].
//!
//! The subprocess engines are synchronous at the trait boundary and are
//! meant to run on the [`WorkerPool`](crate::worker::WorkerPool); they drive
//! their child process on the ambient tokio runtime from that blocking
//! thread.

mod openai;
mod piper;
mod whisper;

pub use openai::OpenAiChatModel;
pub use piper::PiperEngine;
pub use whisper::WhisperCliEngine;

use crate::error::VoiceError;
use std::future::Future;

/// Runs `fut` to completion from a blocking worker thread.
///
/// Fails if called outside a tokio runtime.
fn block_on_runtime<F: Future>(fut: F) -> Result<F::Output, VoiceError> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| VoiceError::Worker(format!("no tokio runtime for subprocess: {}", e)))?;
    Ok(handle.block_on(fut))
}
