#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod keys;
pub mod progress;

pub use progress_core::Clock;

pub use cache::{CacheInvalidationCoordinator, InvalidationReport};
pub use config::{ConfigError, EngineConfig};
pub use engine::ProgressEngine;
pub use error::{EngineError, MutationError};
pub use events::{ProgressChange, ProgressEvent, ProgressEventBus};
pub use progress::{ProgressMutationService, ProgressStore};
