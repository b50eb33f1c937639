//! Typed change notifications for progress writes.

use serde::Serialize;
use tokio::sync::broadcast;

use progress_core::model::{LessonId, LessonProgress, ModuleId};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What subscribers learn about a write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressChange {
    pub lesson_id: LessonId,
    pub module_id: Option<ModuleId>,
    pub progress: f64,
    pub completion_percentage: f64,
    pub completed: bool,
}

impl ProgressChange {
    #[must_use]
    pub fn from_record(record: &LessonProgress) -> Self {
        Self {
            lesson_id: record.lesson_id().clone(),
            module_id: record.module_id().cloned(),
            progress: record.progress(),
            completion_percentage: record.completion_percentage(),
            completed: record.is_completed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail")]
pub enum ProgressEvent {
    #[serde(rename = "progress:updated")]
    Updated(ProgressChange),
    /// Sent after `Updated` when a write moved the lesson into completion.
    #[serde(rename = "lesson:completed")]
    LessonCompleted(ProgressChange),
}

impl ProgressEvent {
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Updated(_) => "progress:updated",
            Self::LessonCompleted(_) => "lesson:completed",
        }
    }

    #[must_use]
    pub fn change(&self) -> &ProgressChange {
        match self {
            Self::Updated(change) | Self::LessonCompleted(change) => change,
        }
    }
}

/// Broadcast channel for `ProgressEvent`s.
///
/// Subscribers only see events sent after they subscribed. A subscriber
/// that falls more than `capacity` events behind loses the oldest ones.
#[derive(Debug, Clone)]
pub struct ProgressEventBus {
    tx: broadcast::Sender<ProgressEvent>,
    capacity: usize,
}

impl Default for ProgressEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ProgressEventBus {
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Send to all subscribers; returns how many received it.
    ///
    /// # Errors
    ///
    /// Returns the event back if nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ProgressEvent,
    ) -> Result<usize, broadcast::error::SendError<ProgressEvent>> {
        self.tx.send(event)
    }

    /// Send, ignoring the no-subscriber case.
    pub fn emit_lossy(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
