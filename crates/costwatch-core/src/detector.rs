//! Threshold detector.
//!
//! A service is anomalous when its spend on the report date exceeds the
//! trailing daily average by more than the larger of a relative margin and
//! an absolute floor:
//!
//! ```text
//! baseline = baseline_total / baseline_days
//! margin   = max(baseline * threshold_percent / 100, min_absolute_increase)
//! anomaly  = recent > baseline + margin
//! ```
//!
//! Baselines at or below zero (a new service, or credits outweighing cost)
//! count as "no baseline" and are compared against the floor alone.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::types::{Anomaly, AnomalyReason, DetectionReport, ServiceCost};

pub const DEFAULT_THRESHOLD_PERCENT: f64 = 30.0;
pub const DEFAULT_BASELINE_DAYS: u32 = 7;
pub const DEFAULT_MIN_ABSOLUTE_INCREASE: f64 = 5.0;

/// Detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Relative margin over the baseline, in percent.
    pub threshold_percent: f64,
    /// Length of the trailing baseline window, in days.
    pub baseline_days: u32,
    /// Absolute margin in billing currency; also the trigger for new services.
    pub min_absolute_increase: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            baseline_days: DEFAULT_BASELINE_DAYS,
            min_absolute_increase: DEFAULT_MIN_ABSOLUTE_INCREASE,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baseline_days == 0 {
            return Err(ConfigError::invalid("BASELINE_DAYS", "0", "must be at least 1"));
        }
        if !self.threshold_percent.is_finite() || self.threshold_percent < 0.0 {
            return Err(ConfigError::invalid(
                "THRESHOLD_PERCENT",
                self.threshold_percent.to_string(),
                "must be a non-negative number",
            ));
        }
        if !self.min_absolute_increase.is_finite() || self.min_absolute_increase < 0.0 {
            return Err(ConfigError::invalid(
                "MIN_ABSOLUTE_INCREASE",
                self.min_absolute_increase.to_string(),
                "must be a non-negative number",
            ));
        }
        Ok(())
    }

    /// First day of the baseline window for a report date.
    pub fn baseline_start(&self, report_date: NaiveDate) -> NaiveDate {
        report_date
            .checked_sub_days(Days::new(u64::from(self.baseline_days)))
            .unwrap_or(NaiveDate::MIN)
    }
}

/// Applies [`Thresholds`] to per-service cost rows.
#[derive(Debug, Clone)]
pub struct Detector {
    thresholds: Thresholds,
    exclude_services: Vec<String>,
}

impl Detector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            exclude_services: Vec::new(),
        }
    }

    /// Skip services by exact `service.description` match.
    pub fn with_exclusions(mut self, services: Vec<String>) -> Self {
        self.exclude_services = services;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn is_excluded(&self, service: &str) -> bool {
        self.exclude_services.iter().any(|s| s == service)
    }

    /// Evaluate a single row.
    pub fn evaluate(&self, row: &ServiceCost) -> Option<Anomaly> {
        let t = &self.thresholds;
        let baseline_avg = row.baseline_total / f64::from(t.baseline_days.max(1));

        if baseline_avg <= 0.0 {
            // Credits can push the baseline negative; measure against zero.
            if row.recent_cost > t.min_absolute_increase {
                return Some(Anomaly {
                    service: row.service.clone(),
                    recent_cost: row.recent_cost,
                    baseline_avg: 0.0,
                    deviation_abs: row.recent_cost,
                    percent_change: None,
                    reason: AnomalyReason::NoBaseline {
                        min_absolute: t.min_absolute_increase,
                    },
                });
            }
            return None;
        }

        let percent_margin = baseline_avg * t.threshold_percent / 100.0;
        let margin = percent_margin.max(t.min_absolute_increase);
        if row.recent_cost <= baseline_avg + margin {
            return None;
        }

        let deviation_abs = row.recent_cost - baseline_avg;
        let reason = if percent_margin >= t.min_absolute_increase {
            AnomalyReason::PercentThreshold {
                threshold_percent: t.threshold_percent,
            }
        } else {
            AnomalyReason::AbsoluteFloor {
                min_absolute: t.min_absolute_increase,
            }
        };

        Some(Anomaly {
            service: row.service.clone(),
            recent_cost: row.recent_cost,
            baseline_avg,
            deviation_abs,
            percent_change: Some(deviation_abs / baseline_avg * 100.0),
            reason,
        })
    }

    /// Evaluate all rows, preserving their order.
    pub fn detect(&self, rows: &[ServiceCost]) -> Vec<Anomaly> {
        rows.iter()
            .filter(|row| {
                let excluded = self.is_excluded(&row.service);
                if excluded {
                    debug!(service = %row.service, "service excluded from detection");
                }
                !excluded
            })
            .filter_map(|row| self.evaluate(row))
            .collect()
    }

    /// Build the full report for a report date.
    pub fn report(&self, report_date: NaiveDate, rows: &[ServiceCost]) -> DetectionReport {
        let anomalies = self.detect(rows);
        let checked: Vec<&ServiceCost> =
            rows.iter().filter(|r| !self.is_excluded(&r.service)).collect();

        debug!(
            %report_date,
            services = checked.len(),
            anomalies = anomalies.len(),
            "detection complete"
        );

        DetectionReport {
            report_date,
            baseline_start: self.thresholds.baseline_start(report_date),
            baseline_days: self.thresholds.baseline_days,
            services_checked: checked.len(),
            total_recent_cost: checked.iter().map(|r| r.recent_cost).sum(),
            anomalies,
        }
    }
}
