//! Engine error types

use crate::engine::formula::FormulaError;
use crate::engine::template::TemplateError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors from metric computation
///
/// During scheduled collection these are caught and persisted as
/// error-status snapshots; during manual invocation they surface to the
/// caller.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("metric '{0}' not found")]
    MetricNotFound(String),

    #[error("metric '{metric}' has an invalid definition: {reason}")]
    InvalidDefinition { metric: String, reason: String },

    #[error("query for metric '{metric}' failed: {reason}")]
    Query { metric: String, reason: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error("composite metric '{metric}' depends on unknown metric '{dependency}'")]
    UnresolvedDependency { metric: String, dependency: String },

    /// A composite depends, directly or transitively, on itself
    #[error("cyclic metric dependency: {chain}")]
    DependencyCycle { chain: String },

    #[error("metric '{metric}' produced a non-finite value")]
    NonFinite { metric: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ComputeResult<T> = Result<T, ComputeError>;
