//! Core domain model
//!
//! Definitions say what is measured, configurations say how collection is
//! scheduled and retained, snapshots are the immutable computed values.
//! All three are plain data with structural validation; behavior lives in
//! the engine, scheduler and analytics modules.

pub mod configuration;
pub mod definition;
pub mod error;
pub mod period;
pub mod snapshot;

pub use configuration::{
    AlertKind, AlertRule, AlertSeverity, DashboardHints, MetricConfiguration, RetentionPolicy,
    SamplingStrategy, ScheduleKind, DEFAULT_COLLECTION_TIMEOUT_SECS,
};
pub use definition::{valid_code, Category, DefinitionFilter, MetricDefinition, MetricKind};
pub use error::{ValidationError, ValidationResult};
pub use period::{Granularity, Period};
pub use snapshot::{
    truncate_error, DimensionSet, MetricSnapshot, SnapshotKey, SnapshotStatus,
    MAX_ERROR_MESSAGE_LEN,
};
