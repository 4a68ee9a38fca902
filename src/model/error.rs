//! Model validation errors
//!
//! Raised synchronously when a definition or configuration is malformed.
//! Nothing that fails validation is ever persisted.

use thiserror::Error;

/// Errors produced while validating definitions and configurations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Code does not match the identifier pattern
    #[error("invalid metric code '{0}': expected lowercase identifier (a-z, 0-9, _), 3-64 chars")]
    InvalidCode(String),

    /// Query-backed kind without a query template
    #[error("metric '{0}' requires a query template for its kind")]
    MissingQueryTemplate(String),

    /// Percentile kind without a percentile value, or one out of range
    #[error("metric '{0}' requires a percentile in (0, 100]")]
    InvalidPercentile(String),

    /// Composite kind without a formula
    #[error("composite metric '{0}' requires a formula")]
    MissingFormula(String),

    /// Composite kind without dependent metrics
    #[error("composite metric '{0}' must declare at least one dependent metric")]
    MissingDependencies(String),

    /// Composite metric listing itself as a dependency
    #[error("composite metric '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// Formula failed to parse
    #[error("formula for metric '{metric}' is malformed: {reason}")]
    MalformedFormula { metric: String, reason: String },

    /// Cron schedule without an expression, or an unrecognized one
    #[error("invalid cron schedule for metric {metric_id}: {reason}")]
    InvalidCronSchedule { metric_id: i64, reason: String },

    /// Event schedule without an event name
    #[error("event schedule for metric {0} requires an event name")]
    MissingEventName(i64),

    /// Interval schedule with a zero interval
    #[error("interval schedule for metric {0} requires a positive interval")]
    InvalidInterval(i64),

    /// Non-full sampling without a sample size
    #[error("sampling strategy '{strategy}' for metric {metric_id} requires a sample size")]
    MissingSampleSize { metric_id: i64, strategy: String },

    /// Kind change attempted after snapshots exist
    #[error("metric '{0}' already has snapshots; its kind can no longer change")]
    KindChangeForbidden(String),

    /// Generic field-level complaint
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Result type alias for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ValidationError::InvalidCode("Bad-Code".to_string());
        assert!(err.to_string().contains("Bad-Code"));

        let err = ValidationError::KindChangeForbidden("approved_total".to_string());
        assert!(err.to_string().contains("kind can no longer change"));
    }
}
