use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Key of a cached query, e.g. `/api/progress/lessons/l1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects a set of keys for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatcher {
    Exact(CacheKey),
    Prefix(String),
}

impl KeyMatcher {
    #[must_use]
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Prefix(prefix) => key.as_str().starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{key}"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("invalidation failed for {key}: {reason}")]
    Invalidation { key: String, reason: String },
}

/// The query cache that views read from.
///
/// Invalidation only marks entries stale; refetching is the cache's business.
#[async_trait]
pub trait ReactiveCache: Send + Sync {
    /// # Errors
    ///
    /// Returns `CacheError` if the key could not be marked stale.
    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Mark every key selected by `matcher` stale; returns how many matched.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the cache cannot be reached.
    async fn invalidate_matching(&self, matcher: &KeyMatcher) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub stale: bool,
}

#[derive(Default)]
struct CacheState {
    entries: BTreeMap<CacheKey, CacheEntry>,
    failing: BTreeSet<CacheKey>,
}

/// Process-local `ReactiveCache`.
///
/// Invalidating an unknown key creates a stale placeholder, so a later
/// fetch for that key always goes to the network. Every invalidated key is
/// broadcast to subscribers.
#[derive(Clone)]
pub struct MemoryCache {
    state: Arc<Mutex<CacheState>>,
    notify: broadcast::Sender<CacheKey>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    const CHANNEL_CAPACITY: usize = 256;

    #[must_use]
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(Self::CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            notify,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, CacheState>, CacheError> {
        self.state
            .lock()
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    /// Store a fresh value.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the cache lock is poisoned.
    pub fn insert(&self, key: CacheKey, value: Value) -> Result<(), CacheError> {
        self.lock()?.entries.insert(
            key,
            CacheEntry {
                value: Some(value),
                stale: false,
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().ok()?.entries.get(key).cloned()
    }

    #[must_use]
    pub fn entries(&self) -> BTreeMap<CacheKey, CacheEntry> {
        self.lock()
            .map(|state| state.entries.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.notify.subscribe()
    }

    /// Make every invalidation of `key` fail. Exact keys only.
    pub fn fail_on(&self, key: CacheKey) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(key);
        }
    }

    fn announce(&self, key: &CacheKey) {
        // No subscribers is fine.
        let _ = self.notify.send(key.clone());
    }
}

#[async_trait]
impl ReactiveCache for MemoryCache {
    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        {
            let mut state = self.lock()?;
            if state.failing.contains(key) {
                return Err(CacheError::Invalidation {
                    key: key.to_string(),
                    reason: "injected failure".into(),
                });
            }
            state
                .entries
                .entry(key.clone())
                .and_modify(|entry| entry.stale = true)
                .or_insert(CacheEntry {
                    value: None,
                    stale: true,
                });
        }
        self.announce(key);
        Ok(())
    }

    async fn invalidate_matching(&self, matcher: &KeyMatcher) -> Result<usize, CacheError> {
        let matched: Vec<CacheKey> = {
            let mut state = self.lock()?;
            state
                .entries
                .iter_mut()
                .filter(|(key, _)| matcher.matches(key))
                .map(|(key, entry)| {
                    entry.stale = true;
                    key.clone()
                })
                .collect()
        };
        for key in &matched {
            self.announce(key);
        }
        Ok(matched.len())
    }
}
