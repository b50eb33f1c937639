//! Collaborator contracts of the progress engine and their adapters.

pub mod auth;
pub mod backend;
pub mod cache;
pub mod http;

pub use auth::{AuthTokenProvider, NoAuth, StaticToken};
pub use backend::{BackendError, InMemoryBackend, ProgressBackend, WriteGate};
pub use cache::{CacheEntry, CacheError, CacheKey, KeyMatcher, MemoryCache, ReactiveCache};
pub use http::{HttpBackendConfig, HttpConfigError, HttpProgressBackend};
