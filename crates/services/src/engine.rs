use std::sync::Arc;

use tokio::sync::broadcast;

use storage::{
    HttpBackendConfig, HttpProgressBackend, MemoryCache, ProgressBackend, ReactiveCache,
};

use crate::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ProgressEvent, ProgressEventBus};
use crate::progress::{ProgressMutationService, ProgressStore};

/// Assembles the progress services around one backend and one cache.
#[derive(Clone)]
pub struct ProgressEngine {
    progress: Arc<ProgressMutationService>,
    cache: Arc<dyn ReactiveCache>,
    events: ProgressEventBus,
}

impl ProgressEngine {
    #[must_use]
    pub fn new(
        clock: Clock,
        backend: Arc<dyn ProgressBackend>,
        cache: Arc<dyn ReactiveCache>,
        config: EngineConfig,
    ) -> Self {
        let events = ProgressEventBus::new(config.event_capacity);
        let progress = Arc::new(ProgressMutationService::new(
            clock,
            backend,
            Arc::clone(&cache),
            events.clone(),
            config,
        ));
        Self {
            progress,
            cache,
            events,
        }
    }

    /// Build an engine talking to the REST backend, with a process-local cache.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the HTTP client cannot be built.
    pub fn http(
        clock: Clock,
        http: HttpBackendConfig,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let backend = HttpProgressBackend::new(http)?;
        Ok(Self::new(
            clock,
            Arc::new(backend),
            Arc::new(MemoryCache::new()),
            config,
        ))
    }

    /// Build an engine from `LEARN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MissingApiUrl` when no API url is configured, or
    /// the config error of a malformed variable.
    pub fn from_env(clock: Clock) -> Result<Self, EngineError> {
        let http = HttpBackendConfig::from_env()?.ok_or(EngineError::MissingApiUrl)?;
        let config = EngineConfig::from_env()?;
        Self::http(clock, http, config)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressMutationService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn store(&self) -> ProgressStore {
        self.progress.store()
    }

    #[must_use]
    pub fn cache(&self) -> Arc<dyn ReactiveCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::ProgressUpdate;
    use progress_core::time::fixed_now;
    use storage::InMemoryBackend;

    #[tokio::test]
    async fn engine_wires_store_and_events_to_one_service() {
        let backend = InMemoryBackend::new();
        let engine = ProgressEngine::new(
            Clock::fixed(fixed_now()),
            Arc::new(backend.clone()),
            Arc::new(MemoryCache::new()),
            EngineConfig::default(),
        );
        let mut rx = engine.subscribe();

        engine
            .progress()
            .update_lesson_progress("module-01-intro", ProgressUpdate::progress(0.5))
            .await
            .unwrap();

        let id = "module-01-intro".parse().unwrap();
        assert!(engine.store().lesson(&id).is_some());
        assert_eq!(rx.recv().await.unwrap().event_type(), "progress:updated");
        assert_eq!(backend.writes().len(), 1);
    }
}
