use thiserror::Error;
use uuid::Uuid;

/// Failure computing a single metric for one student.
#[derive(Error, Debug)]
pub enum MetricError {
    /// The underlying records violate an invariant (bad points, duplicate days, ...).
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    /// Not enough data to compute the metric. Never a zero.
    #[error("no data: {0}")]
    NoData(String),

    #[error("offering not found: {0}")]
    UnknownOffering(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl MetricError {
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::NoData(message.into())
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData(_))
    }

    pub fn is_data_integrity(&self) -> bool {
        matches!(self, Self::DataIntegrity(_) | Self::UnknownOffering(_))
    }
}

/// Invalid engine configuration. Aborts a batch run before it starts.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Handoff to the external delivery transport failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("handoff rejected: {0}")]
    Rejected(String),

    #[error("handoff timed out after {0}s")]
    Timeout(u64),
}

pub type MetricResult<T> = std::result::Result<T, MetricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_is_distinct_from_integrity() {
        let err = MetricError::no_data("zero graded assignments");
        assert!(err.is_no_data());
        assert!(!err.is_data_integrity());

        let err = MetricError::integrity("maxPoints must be positive");
        assert!(!err.is_no_data());
        assert!(err.is_data_integrity());
    }

    #[test]
    fn config_error_names_the_key() {
        let err = ConfigError::OutOfRange {
            key: "dedupWindowDays",
            expected: ">= 0",
            value: "-1".to_string(),
        };
        assert_eq!(err.to_string(), "dedupWindowDays must be >= 0, got -1");
    }
}
