use std::sync::Arc;

use tracing::{info, warn};

use progress_core::model::ProgressSnapshot;
use storage::BackendError;

use crate::error::MutationError;
use crate::progress::ProgressMutationService;

impl ProgressMutationService {
    /// Refetch the snapshot and rebuild the normalized state from it.
    ///
    /// The new snapshot replaces the old one wholesale. Lessons with a write
    /// in flight are max-merged so the refetch cannot regress them. When the
    /// backend is unreachable or refuses the session, a `local` snapshot
    /// derived from the normalized state takes its place.
    ///
    /// # Errors
    ///
    /// Returns `MutationError` for backend failures other than offline and
    /// unauthorized.
    pub async fn refresh_snapshot(&self) -> Result<Arc<ProgressSnapshot>, MutationError> {
        match self.with_recovery(|| self.backend.fetch_snapshot()).await {
            Ok(raw) => {
                let snapshot = raw.ingest();
                info!(
                    lessons = snapshot.lessons.len(),
                    source = ?snapshot.source,
                    "progress snapshot refreshed"
                );
                self.store.replace_snapshot(snapshot)
            }
            Err(err) if err.is_offline() || err == BackendError::Unauthorized => {
                warn!(error = %err, "snapshot unavailable; using local progress");
                self.store.fall_back_to_local(&self.config.curriculum)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The current snapshot, fetching one if none was loaded yet.
    ///
    /// # Errors
    ///
    /// Same as `refresh_snapshot`.
    pub async fn snapshot(&self) -> Result<Arc<ProgressSnapshot>, MutationError> {
        match self.store.snapshot() {
            Some(snapshot) => Ok(snapshot),
            None => self.refresh_snapshot().await,
        }
    }
}
