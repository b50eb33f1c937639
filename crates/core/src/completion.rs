//! The one completion rule shared by every reader of progress data.
//!
//! A lesson is complete iff its progress value is exactly `1.0` after
//! clamping. Transport `completed` flags never feed into this.

/// Resolve a lesson's progress value from whichever fields are present.
///
/// `progress` wins when it is a finite number; otherwise the legacy
/// `completion_percentage` is scaled down; otherwise `0.0`. The result is
/// clamped to `[0, 1]`.
#[must_use]
pub fn progress_value(progress: Option<f64>, completion_percentage: Option<f64>) -> f64 {
    let raw = match (progress, completion_percentage) {
        (Some(p), _) if p.is_finite() => p,
        (_, Some(pct)) if pct.is_finite() => pct / 100.0,
        _ => 0.0,
    };
    clamp_unit(raw)
}

/// `true` iff the resolved progress value is exactly one.
#[must_use]
pub fn is_completed(progress: Option<f64>, completion_percentage: Option<f64>) -> bool {
    is_complete_value(progress_value(progress, completion_percentage))
}

/// `true` iff an already-resolved progress value represents completion.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_complete_value(value: f64) -> bool {
    clamp_unit(value) == 1.0
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_field_wins_over_percentage() {
        assert!((progress_value(Some(0.25), Some(100.0)) - 0.25).abs() < f64::EPSILON);
        assert!(!is_completed(Some(0.25), Some(100.0)));
    }

    #[test]
    fn percentage_used_when_progress_missing_or_not_numeric() {
        assert!((progress_value(None, Some(40.0)) - 0.4).abs() < 1e-12);
        assert!(is_completed(Some(f64::NAN), Some(100.0)));
    }

    #[test]
    fn missing_fields_mean_zero() {
        assert!(progress_value(None, None).abs() < f64::EPSILON);
        assert!(!is_completed(None, None));
    }

    #[test]
    fn values_are_clamped_before_comparison() {
        assert!(is_completed(Some(1.7), None));
        assert!(is_completed(None, Some(250.0)));
        assert!(progress_value(Some(-3.0), None).abs() < f64::EPSILON);
    }

    #[test]
    fn almost_done_is_not_done() {
        assert!(!is_completed(Some(0.999_999), None));
        assert!(!is_completed(None, Some(99.9)));
    }
}
