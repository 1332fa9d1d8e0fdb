use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Thresholds and operational limits for the engine.
///
/// Keys are camelCase in the TOML file, e.g. `lowAttendanceRate = 0.92`.
/// Anything left out falls back to its documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Attendance rate (0..=1) below which attendance counts as chronically low.
    #[serde(default = "default_low_attendance_rate")]
    pub low_attendance_rate: f64,
    #[serde(default = "default_min_sample")]
    pub low_attendance_min_sample: i64,
    #[serde(default = "default_consecutive_absence_threshold")]
    pub consecutive_absence_threshold: i64,
    #[serde(default = "default_tardiness_threshold")]
    pub tardiness_threshold: i64,
    #[serde(default = "default_min_sample")]
    pub tardiness_min_sample: i64,
    /// Offering percentage (0..=100) below which a grade is failing.
    #[serde(default = "default_failing_grade_floor")]
    pub failing_grade_floor: f64,
    #[serde(default = "default_dedup_window_days")]
    pub dedup_window_days: i64,
    #[serde(default)]
    pub credit_hour_weighting_enabled: bool,
    #[serde(default)]
    pub missing_assignment_grace_days: i64,
    #[serde(default = "default_attendance_window_days")]
    pub attendance_window_days: i64,

    #[serde(default = "default_worker_count")]
    pub worker_count: i64,
    #[serde(default = "default_student_timeout_secs")]
    pub student_timeout_secs: i64,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: i64,
    #[serde(default = "default_delivery_max_attempts")]
    pub delivery_max_attempts: i64,
    #[serde(default = "default_delivery_backoff_millis")]
    pub delivery_backoff_millis: i64,
    #[serde(default = "default_dispatch_lease_secs")]
    pub dispatch_lease_secs: i64,
}

fn default_low_attendance_rate() -> f64 {
    0.90
}

fn default_min_sample() -> i64 {
    10
}

fn default_consecutive_absence_threshold() -> i64 {
    3
}

fn default_tardiness_threshold() -> i64 {
    3
}

fn default_failing_grade_floor() -> f64 {
    70.0
}

fn default_dedup_window_days() -> i64 {
    7
}

fn default_attendance_window_days() -> i64 {
    30
}

fn default_worker_count() -> i64 {
    8
}

fn default_student_timeout_secs() -> i64 {
    60
}

fn default_delivery_timeout_secs() -> i64 {
    10
}

fn default_delivery_max_attempts() -> i64 {
    3
}

fn default_delivery_backoff_millis() -> i64 {
    500
}

fn default_dispatch_lease_secs() -> i64 {
    900
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_attendance_rate: default_low_attendance_rate(),
            low_attendance_min_sample: default_min_sample(),
            consecutive_absence_threshold: default_consecutive_absence_threshold(),
            tardiness_threshold: default_tardiness_threshold(),
            tardiness_min_sample: default_min_sample(),
            failing_grade_floor: default_failing_grade_floor(),
            dedup_window_days: default_dedup_window_days(),
            credit_hour_weighting_enabled: false,
            missing_assignment_grace_days: 0,
            attendance_window_days: default_attendance_window_days(),
            worker_count: default_worker_count(),
            student_timeout_secs: default_student_timeout_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            delivery_max_attempts: default_delivery_max_attempts(),
            delivery_backoff_millis: default_delivery_backoff_millis(),
            dispatch_lease_secs: default_dispatch_lease_secs(),
        }
    }
}

fn at_least(key: &'static str, value: i64, min: i64, expected: &'static str) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::OutOfRange {
            key,
            expected,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn within(
    key: &'static str,
    value: i64,
    min: i64,
    max: i64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key,
            expected,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Checks every field once, before any student is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.low_attendance_rate > 0.0 && self.low_attendance_rate <= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "lowAttendanceRate",
                expected: "in (0, 1]",
                value: self.low_attendance_rate.to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.failing_grade_floor) {
            return Err(ConfigError::OutOfRange {
                key: "failingGradeFloor",
                expected: "in [0, 100]",
                value: self.failing_grade_floor.to_string(),
            });
        }

        at_least("lowAttendanceMinSample", self.low_attendance_min_sample, 1, ">= 1")?;
        at_least("consecutiveAbsenceThreshold", self.consecutive_absence_threshold, 1, ">= 1")?;
        at_least("tardinessThreshold", self.tardiness_threshold, 1, ">= 1")?;
        at_least("tardinessMinSample", self.tardiness_min_sample, 1, ">= 1")?;
        within("dedupWindowDays", self.dedup_window_days, 0, 3650, "in [0, 3650]")?;
        within(
            "missingAssignmentGraceDays",
            self.missing_assignment_grace_days,
            0,
            3650,
            "in [0, 3650]",
        )?;
        within("attendanceWindowDays", self.attendance_window_days, 1, 3650, "in [1, 3650]")?;
        within("workerCount", self.worker_count, 1, 1024, "in [1, 1024]")?;
        within("studentTimeoutSecs", self.student_timeout_secs, 1, 86_400, "in [1, 86400]")?;
        within("deliveryTimeoutSecs", self.delivery_timeout_secs, 1, 3_600, "in [1, 3600]")?;
        within("deliveryMaxAttempts", self.delivery_max_attempts, 1, 20, "in [1, 20]")?;
        within(
            "deliveryBackoffMillis",
            self.delivery_backoff_millis,
            0,
            600_000,
            "in [0, 600000]",
        )?;
        within("dispatchLeaseSecs", self.dispatch_lease_secs, 1, 86_400, "in [1, 86400]")?;
        Ok(())
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.dedup_window_days)
    }

    pub fn dispatch_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dispatch_lease_secs)
    }

    pub fn student_timeout(&self) -> Duration {
        Duration::from_secs(self.student_timeout_secs.max(1) as u64)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.max(1) as u64)
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn delivery_backoff(&self, retry: u32) -> Duration {
        let base = self.delivery_backoff_millis.max(0) as u64;
        Duration::from_millis(base.saturating_mul(1u64 << retry.saturating_sub(1).min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.low_attendance_rate, 0.90);
        assert_eq!(config.low_attendance_min_sample, 10);
        assert_eq!(config.consecutive_absence_threshold, 3);
        assert_eq!(config.failing_grade_floor, 70.0);
        assert_eq!(config.dedup_window_days, 7);
        assert!(!config.credit_hour_weighting_enabled);
    }

    #[test]
    fn parses_camel_case_keys_and_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            lowAttendanceRate = 0.85
            dedupWindowDays = 14
            creditHourWeightingEnabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.low_attendance_rate, 0.85);
        assert_eq!(config.dedup_window_days, 14);
        assert!(config.credit_hour_weighting_enabled);
        assert_eq!(config.tardiness_threshold, 3);
        assert_eq!(config.worker_count, 8);
    }

    #[test]
    fn negative_dedup_window_is_rejected() {
        let config = EngineConfig {
            dedup_window_days: -1,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                key: "dedupWindowDays",
                ..
            }
        ));
    }

    #[test]
    fn oversized_windows_fail_validation() {
        let config = EngineConfig {
            dedup_window_days: 200_000_000_000_000,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::OutOfRange {
                key: "dedupWindowDays",
                ..
            }
        ));

        let config = EngineConfig {
            dispatch_lease_secs: 86_401,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            attendance_window_days: 3_650,
            missing_assignment_grace_days: 3_650,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rate_above_one_is_rejected() {
        let config = EngineConfig {
            low_attendance_rate: 90.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn failing_floor_out_of_range_is_rejected() {
        let config = EngineConfig {
            failing_grade_floor: -5.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles() {
        let config = EngineConfig {
            delivery_backoff_millis: 100,
            ..EngineConfig::default()
        };
        assert_eq!(config.delivery_backoff(1), Duration::from_millis(100));
        assert_eq!(config.delivery_backoff(2), Duration::from_millis(200));
        assert_eq!(config.delivery_backoff(3), Duration::from_millis(400));
    }
}
