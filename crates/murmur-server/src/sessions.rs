//! Open pipeline sessions, keyed by session id.

use murmur_voice::{
    validate_session_id, PipelineCoordinator, ResourceGuard, VoiceConfig, VoiceEngines, VoiceError,
    WorkerPool,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// A coordinator shared between the requests of one session.
pub type SharedCoordinator = Arc<tokio::sync::Mutex<PipelineCoordinator>>;

struct Entry {
    coordinator: SharedCoordinator,
    last_used: u64,
}

/// Hands out one coordinator per session id.
///
/// Requests of the same session serialize on the coordinator's mutex. When
/// the registry is full, the least recently used session is closed to make
/// room.
pub struct SessionRegistry {
    voice: Arc<VoiceConfig>,
    engines: VoiceEngines,
    pool: WorkerPool,
    guard: ResourceGuard,
    capacity: usize,
    clock: AtomicU64,
    // Held only for map lookups, never across an await.
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new(
        voice: Arc<VoiceConfig>,
        engines: VoiceEngines,
        pool: WorkerPool,
        guard: ResourceGuard,
        capacity: usize,
    ) -> Self {
        Self {
            voice,
            engines,
            pool,
            guard,
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the coordinator for `requested`, creating one (and a fresh
    /// id when none was requested) if the session is not open.
    ///
    /// # Errors
    ///
    /// Returns `VoiceError::Validation` if `requested` is not a plain token.
    pub fn checkout(
        &self,
        requested: Option<&str>,
    ) -> Result<(String, SharedCoordinator), VoiceError> {
        let id = match requested {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&id) {
            entry.last_used = self.tick();
            return Ok((id, entry.coordinator.clone()));
        }

        if entries.len() >= self.capacity {
            if let Some(evicted) = least_recently_used(&entries) {
                if let Some(entry) = entries.remove(&evicted) {
                    tracing::info!(session_id = %evicted, "session registry full, closing idle session");
                    spawn_close(evicted, entry.coordinator);
                }
            }
        }

        let coordinator = Arc::new(tokio::sync::Mutex::new(PipelineCoordinator::new(
            self.voice.clone(),
            &self.engines,
            self.pool.clone(),
            self.guard.clone(),
        )));
        entries.insert(
            id.clone(),
            Entry {
                coordinator: coordinator.clone(),
                last_used: self.tick(),
            },
        );
        Ok((id, coordinator))
    }

    /// Closes and forgets `session_id`. Returns `false` if it was not open.
    pub async fn close(&self, session_id: &str) -> bool {
        let entry = self.lock().remove(session_id);
        match entry {
            Some(entry) => {
                let errors = entry.coordinator.lock().await.close().await;
                if !errors.is_empty() {
                    tracing::warn!(session_id, errors = errors.len(), "session closed with cleanup errors");
                }
                true
            }
            None => false,
        }
    }

    /// Closes every open session.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Entry)> = self.lock().drain().collect();
        for (id, entry) in drained {
            let errors = entry.coordinator.lock().await.close().await;
            tracing::debug!(session_id = %id, errors = errors.len(), "session closed on shutdown");
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn least_recently_used(entries: &HashMap<String, Entry>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used)
        .map(|(id, _)| id.clone())
}

fn spawn_close(session_id: String, coordinator: SharedCoordinator) {
    tokio::spawn(async move {
        let errors = coordinator.lock().await.close().await;
        tracing::debug!(session_id = %session_id, errors = errors.len(), "evicted session closed");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_types::Message;
    use murmur_voice::{
        InferenceOptions, LanguageModel, RecognitionEngine, RecognitionInput, SynthesisEngine,
        SynthesisTarget, TextStream, VoiceError,
    };

    struct Idle;

    impl RecognitionEngine for Idle {
        fn infer(&self, _: &RecognitionInput, _: &InferenceOptions) -> Result<String, VoiceError> {
            Ok(String::new())
        }
    }

    impl SynthesisEngine for Idle {
        fn synthesize(&self, _: &str, _: SynthesisTarget<'_>) -> Result<Vec<u8>, VoiceError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl LanguageModel for Idle {
        async fn stream_response(&self, _: &str, _: &[Message]) -> Result<TextStream, VoiceError> {
            Err(VoiceError::Llm("idle".into()))
        }
    }

    fn registry(capacity: usize) -> SessionRegistry {
        let idle = Arc::new(Idle);
        SessionRegistry::new(
            Arc::new(VoiceConfig::default()),
            VoiceEngines {
                recognition: idle.clone(),
                synthesis: idle.clone(),
                model: idle,
            },
            WorkerPool::new(1),
            ResourceGuard::new(),
            capacity,
        )
    }

    #[tokio::test]
    async fn same_id_returns_same_coordinator() {
        let sessions = registry(4);
        let (id, first) = sessions.checkout(Some("a")).unwrap();
        let (_, again) = sessions.checkout(Some("a")).unwrap();
        assert_eq!(id, "a");
        assert!(Arc::ptr_eq(&first, &again));

        let (generated, _) = sessions.checkout(None).unwrap();
        assert_eq!(generated.len(), 36);
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn full_registry_evicts_least_recently_used() {
        let sessions = registry(2);
        for id in ["a", "b", "a", "c"] {
            sessions.checkout(Some(id)).unwrap();
        }

        assert_eq!(sessions.len(), 2);
        assert!(!sessions.close("b").await, "b was evicted");
        assert!(sessions.close("a").await);
        sessions.close_all().await;
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn path_like_ids_open_no_session() {
        let sessions = registry(4);
        for bad in ["../escaped", "a/b", ""] {
            let err = sessions.checkout(Some(bad)).err().unwrap();
            assert!(err.is_validation());
        }
        assert!(sessions.is_empty());
    }
}
