use std::env;
use std::time::Duration;

use thiserror::Error;

use progress_core::RecoveryPolicy;
use progress_core::helpers::DEFAULT_REQUEST_TIMEOUT;
use progress_core::model::{Curriculum, ModuleId};

use crate::events::DEFAULT_EVENT_CAPACITY;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Tunables of the progress engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on every backend call.
    pub request_timeout: Duration,
    pub recovery: RecoveryPolicy,
    /// Module assigned to writes whose module cannot be resolved otherwise.
    pub default_module_id: Option<ModuleId>,
    pub event_capacity: usize,
    pub curriculum: Curriculum,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            recovery: RecoveryPolicy::default(),
            default_module_id: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            curriculum: Curriculum::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LEARN_PROGRESS_TIMEOUT_SECS`,
    /// `LEARN_PROGRESS_RETRY_AFTER_SECS`, `LEARN_DEFAULT_MODULE_ID` and
    /// `LEARN_PROGRESS_EVENT_CAPACITY`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a variable is set but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = positive("LEARN_PROGRESS_TIMEOUT_SECS", &lookup)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive("LEARN_PROGRESS_RETRY_AFTER_SECS", &lookup)? {
            config.recovery.default_retry_after = Duration::from_secs(secs);
        }
        if let Some(capacity) = positive("LEARN_PROGRESS_EVENT_CAPACITY", &lookup)? {
            config.event_capacity =
                usize::try_from(capacity).map_err(|_| ConfigError::Invalid {
                    var: "LEARN_PROGRESS_EVENT_CAPACITY",
                    value: capacity.to_string(),
                })?;
        }
        config.default_module_id = lookup("LEARN_DEFAULT_MODULE_ID").and_then(ModuleId::new);

        Ok(config)
    }

    #[must_use]
    pub fn with_curriculum(mut self, curriculum: Curriculum) -> Self {
        self.curriculum = curriculum;
        self
    }

    #[must_use]
    pub fn with_default_module(mut self, module_id: ModuleId) -> Self {
        self.default_module_id = Some(module_id);
        self
    }
}

fn positive(
    var: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::Invalid { var, value: raw }),
    }
}
