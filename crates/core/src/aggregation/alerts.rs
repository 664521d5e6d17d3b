//! Alert rule evaluation

use chrono::{DateTime, Utc};
use keel_domain::{AlertThreshold, ErrorMetrics, FiredAlert};
use tracing::warn;

/// Evaluate every rule whose window matches `metrics.window`
///
/// A rule fires when the observed value is strictly greater than its
/// threshold.
pub fn evaluate_thresholds(
    thresholds: &[AlertThreshold],
    metrics: &ErrorMetrics,
    now: DateTime<Utc>,
) -> Vec<FiredAlert> {
    thresholds
        .iter()
        .filter(|rule| rule.applies_to(metrics))
        .filter_map(|rule| {
            let observed = rule.observe(metrics);
            (observed > rule.threshold).then(|| {
                warn!(
                    metric = %rule.metric,
                    level = %rule.level,
                    observed,
                    threshold = rule.threshold,
                    "Alert threshold exceeded"
                );
                FiredAlert {
                    threshold: rule.clone(),
                    observed,
                    fired_at: now,
                    metrics: metrics.clone(),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keel_domain::{AlertLevel, AlertMetric};

    use super::*;

    fn metrics(total: u32, critical: usize) -> ErrorMetrics {
        let mut metrics = ErrorMetrics::empty(Duration::from_secs(3_600), Utc::now());
        metrics.total_errors = total as usize;
        metrics.error_rate_per_hour = f64::from(total);
        metrics.critical_errors = critical;
        metrics
    }

    /// Validates the built-in rules fire in the expected combinations.
    ///
    /// Assertions:
    /// - Confirms 11 errors/hour fires only the warning rate rule.
    /// - Confirms 30 errors/hour with one critical fires both rate rules
    ///   and the critical-presence rule.
    #[test]
    fn test_default_rules() {
        let rules = AlertThreshold::defaults();
        let now = Utc::now();

        let fired = evaluate_thresholds(&rules, &metrics(11, 0), now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].level(), AlertLevel::Warning);
        assert_eq!(fired[0].threshold.metric, AlertMetric::ErrorRate);

        let fired = evaluate_thresholds(&rules, &metrics(30, 1), now);
        assert_eq!(fired.len(), 3);
        assert_eq!(fired.iter().filter(|a| a.level() == AlertLevel::Critical).count(), 2);
        assert_eq!(fired[0].metrics.total_errors, 30);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let rules = vec![AlertThreshold::new(
            AlertMetric::ErrorCount,
            10.0,
            Duration::from_secs(3_600),
            AlertLevel::Warning,
        )];
        assert!(evaluate_thresholds(&rules, &metrics(10, 0), Utc::now()).is_empty());
        assert_eq!(evaluate_thresholds(&rules, &metrics(11, 0), Utc::now()).len(), 1);
    }

    #[test]
    fn test_rules_for_other_windows_are_skipped() {
        let rules = vec![AlertThreshold::new(
            AlertMetric::ErrorCount,
            0.0,
            Duration::from_secs(60),
            AlertLevel::Info,
        )];
        assert!(evaluate_thresholds(&rules, &metrics(500, 5), Utc::now()).is_empty());
    }
}
