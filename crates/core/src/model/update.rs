use crate::error::ValidationError;
use crate::helpers::{clamp_percentage, clamp_progress};
use crate::model::ModuleId;

/// Caller-facing lesson progress update.
///
/// Either `progress` (`[0, 1]`) or the legacy `completion_percentage`
/// (`[0, 100]`) may be given; `progress` wins when both are. Out-of-range
/// values are clamped, since scroll math upstream is noisy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub progress: Option<f64>,
    pub completion_percentage: Option<f64>,
    pub time_spent_delta: u64,
    pub scroll_position: Option<f64>,
    pub last_viewed_section: Option<String>,
    pub module_id: Option<ModuleId>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn percentage(completion_percentage: f64) -> Self {
        Self {
            completion_percentage: Some(completion_percentage),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_time_spent(mut self, seconds: u64) -> Self {
        self.time_spent_delta = seconds;
        self
    }

    #[must_use]
    pub fn with_scroll_position(mut self, position: f64) -> Self {
        self.scroll_position = Some(position);
        self
    }

    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.last_viewed_section = Some(section.into());
        self
    }

    #[must_use]
    pub fn in_module(mut self, module_id: ModuleId) -> Self {
        self.module_id = Some(module_id);
        self
    }

    /// Reject non-numeric input and clamp the rest.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NonFinite` for NaN or infinite numbers.
    pub fn validate(&self) -> Result<ValidatedUpdate, ValidationError> {
        let progress = match (self.progress, self.completion_percentage) {
            (Some(p), _) => Some(clamp_progress(finite(p, "progress")?)),
            (None, Some(pct)) => {
                Some(clamp_percentage(finite(pct, "completionPercentage")?) / 100.0)
            }
            (None, None) => None,
        };
        let scroll_position = self
            .scroll_position
            .map(|v| finite(v, "scrollPosition"))
            .transpose()?;
        let last_viewed_section = self
            .last_viewed_section
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        Ok(ValidatedUpdate {
            progress,
            time_spent_delta: self.time_spent_delta,
            scroll_position,
            last_viewed_section,
            module_id: self.module_id.clone(),
        })
    }
}

/// An update that passed validation; numbers are finite and in range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedUpdate {
    pub progress: Option<f64>,
    pub time_spent_delta: u64,
    pub scroll_position: Option<f64>,
    pub last_viewed_section: Option<String>,
    pub module_id: Option<ModuleId>,
}

fn finite(value: f64, field: &'static str) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite { field })
    }
}
