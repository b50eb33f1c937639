use serde::Serialize;

/// Derived completion of one module. Never persisted by the client.
///
/// The percentage is a ratio of fully completed lessons to the module's lesson
/// count. Partial lesson progress never contributes, so a module where every
/// lesson sits at 99% is at 0%, not 99%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    pub completed_lessons: u32,
    pub total_lessons: u32,
    /// Fraction in `[0, 1]`.
    pub percent: f64,
    pub is_completed: bool,
}

impl ModuleProgress {
    /// Build from counts. `completed` is capped at `total`; an empty module is 0%.
    #[must_use]
    pub fn from_counts(completed: u32, total: u32) -> Self {
        if total == 0 {
            return Self::default();
        }
        let completed = completed.min(total);
        let percent = f64::from(completed) / f64::from(total);
        Self {
            completed_lessons: completed,
            total_lessons: total,
            percent,
            is_completed: completed == total,
        }
    }

    /// Percentage rounded to a whole number, the shape older views expect.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn rounded_percentage(&self) -> u8 {
        (self.percent * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_is_zero_not_complete() {
        let progress = ModuleProgress::from_counts(0, 0);
        assert!(progress.percent.abs() < f64::EPSILON);
        assert!(!progress.is_completed);
    }

    #[test]
    fn ratio_of_completed_lessons() {
        let progress = ModuleProgress::from_counts(1, 3);
        assert!((progress.percent - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(progress.rounded_percentage(), 33);
        assert!(!progress.is_completed);
    }

    #[test]
    fn completed_is_capped_at_total() {
        let progress = ModuleProgress::from_counts(5, 4);
        assert_eq!(progress.completed_lessons, 4);
        assert!(progress.is_completed);
        assert_eq!(progress.rounded_percentage(), 100);
    }
}
