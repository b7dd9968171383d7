//! Conversation history and the language-model turn loop.

use crate::engine::LanguageModel;
use crate::error::VoiceError;
use futures_util::StreamExt;
use murmur_types::{Message, Role};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Append-only, ordered conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dialogue {
    messages: Vec<Message>,
}

impl Dialogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages from `role`.
    pub fn count(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}

/// Cancels the in-flight turn of a [`DialogueSession`].
///
/// The flag is checked between streamed fragments; a model call already
/// issued is never preempted. Each new turn clears it.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Read-only view of whether the session's current turn has completed.
#[derive(Debug, Clone)]
pub struct TurnStatus(Arc<AtomicBool>);

impl TurnStatus {
    pub fn is_finished(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One session's dialogue with the language model.
pub struct DialogueSession {
    session_id: String,
    dialogue: Dialogue,
    model: Arc<dyn LanguageModel>,
    abort: AbortHandle,
    finished: Arc<AtomicBool>,
}

impl DialogueSession {
    pub fn new(
        session_id: impl Into<String>,
        model: Arc<dyn LanguageModel>,
        system_prompt: Option<&str>,
    ) -> Self {
        let dialogue = match system_prompt {
            Some(prompt) if !prompt.trim().is_empty() => Dialogue::with_system_prompt(prompt),
            _ => Dialogue::new(),
        };
        Self {
            session_id: session_id.into(),
            dialogue,
            model,
            abort: AbortHandle::default(),
            finished: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dialogue(&self) -> &Dialogue {
        &self.dialogue
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn status(&self) -> TurnStatus {
        TurnStatus(self.finished.clone())
    }

    /// Runs one top-level turn for `user_text` and returns the reply.
    ///
    /// Fails with [`VoiceError::Aborted`] if the abort flag is raised
    /// mid-stream, [`VoiceError::NoReply`] if the model yields no text, or
    /// the model's own error. Only a successful turn appends the assistant
    /// message.
    pub async fn converse(&mut self, user_text: &str) -> Result<String, VoiceError> {
        self.converse_at_depth(user_text, 0).await
    }

    /// Like [`converse`](Self::converse), but nested turns (`depth > 0`)
    /// reuse the current history without appending `user_text`.
    ///
    /// Nested turns belong to the enclosing top-level turn: they neither
    /// clear a pending abort nor touch the finished flag.
    pub async fn converse_at_depth(
        &mut self,
        user_text: &str,
        depth: u32,
    ) -> Result<String, VoiceError> {
        if depth > 0 {
            return self.run_turn(user_text, depth).await;
        }
        self.abort.reset();
        self.finished.store(false, Ordering::SeqCst);
        let result = self.run_turn(user_text, depth).await;
        self.finished.store(true, Ordering::SeqCst);
        result
    }

    async fn run_turn(&mut self, user_text: &str, depth: u32) -> Result<String, VoiceError> {
        if depth == 0 {
            if user_text.trim().is_empty() {
                return Err(VoiceError::Validation("user text is empty".to_string()));
            }
            self.dialogue.push(Message::user(user_text));
        }

        let mut stream = self
            .model
            .stream_response(&self.session_id, self.dialogue.messages())
            .await
            .inspect_err(|e| {
                tracing::error!(session_id = %self.session_id, error = %e, "language model request failed")
            })?;

        let mut reply = String::new();
        let mut fragments = 0usize;
        loop {
            if self.abort.is_aborted() {
                tracing::info!(session_id = %self.session_id, fragments, "dialogue turn aborted");
                return Err(VoiceError::Aborted);
            }
            match stream.next().await {
                Some(Ok(fragment)) => {
                    fragments += 1;
                    reply.push_str(&fragment);
                }
                Some(Err(e)) => {
                    tracing::error!(session_id = %self.session_id, fragments, error = %e, "language model stream failed");
                    return Err(e);
                }
                None => break,
            }
        }

        if reply.trim().is_empty() {
            tracing::warn!(session_id = %self.session_id, depth, "language model produced no reply");
            return Err(VoiceError::NoReply);
        }

        tracing::debug!(session_id = %self.session_id, depth, fragments, "dialogue turn completed");
        self.dialogue.push(Message::assistant(reply.clone()));
        Ok(reply)
    }
}
