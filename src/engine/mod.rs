//! Calculation engine
//!
//! Computes a metric's value for a period. Query-backed kinds render the
//! definition's template against the data source and take the first scalar
//! of the first row; rate-of-change runs the same query for the current
//! and immediately preceding periods; composite kinds recursively resolve
//! dependent metrics and evaluate an arithmetic formula over the results.
//!
//! The engine issues read queries only. Persisting results, alerting and
//! retention belong to the scheduler.

pub mod error;
pub mod formula;
pub mod source;
pub mod template;

pub use error::{ComputeError, ComputeResult};
pub use formula::{Formula, FormulaError};
pub use source::{DataSource, SourceError, SourceResult, SqliteDataSource};
pub use template::{TemplateError, TemplateResult};

use crate::model::{DimensionSet, MetricDefinition, MetricKind, Period};
use crate::store::MetricStore;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Computes metric values from queries and formulas
pub struct CalculationEngine {
    store: Arc<dyn MetricStore>,
    source: Arc<dyn DataSource>,
}

impl CalculationEngine {
    pub fn new(store: Arc<dyn MetricStore>, source: Arc<dyn DataSource>) -> Self {
        Self { store, source }
    }

    /// Compute a metric's value over a period and dimension set
    pub async fn compute(
        &self,
        definition: &MetricDefinition,
        period: Period,
        dimensions: &DimensionSet,
    ) -> ComputeResult<f64> {
        let mut stack = Vec::new();
        self.compute_recursive(definition, period, dimensions, &mut stack)
            .await
    }

    /// Kind dispatch; boxed because composite resolution recurses
    fn compute_recursive<'a>(
        &'a self,
        def: &'a MetricDefinition,
        period: Period,
        dimensions: &'a DimensionSet,
        stack: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = ComputeResult<f64>> + Send + 'a>> {
        Box::pin(async move {
            match def.kind {
                MetricKind::Composite => {
                    self.compute_composite(def, period, dimensions, stack).await
                }
                MetricKind::RateOfChange => {
                    // the previous value is recomputed from the source, not
                    // read from cache or prior snapshots
                    let current = self.run_query(def, period, dimensions).await?;
                    let previous = self.run_query(def, period.previous(), dimensions).await?;
                    Ok(rate_of_change(previous, current))
                }
                _ => self.run_query(def, period, dimensions).await,
            }
        })
    }

    /// Resolve each dependent metric, then evaluate the formula over the
    /// resolved values. `stack` holds the codes currently being resolved;
    /// meeting one of them again is a dependency cycle.
    async fn compute_composite(
        &self,
        def: &MetricDefinition,
        period: Period,
        dimensions: &DimensionSet,
        stack: &mut Vec<String>,
    ) -> ComputeResult<f64> {
        let formula_src = def
            .formula
            .as_deref()
            .ok_or_else(|| ComputeError::InvalidDefinition {
                metric: def.code.clone(),
                reason: "composite metric without a formula".to_string(),
            })?;
        if def.depends_on.is_empty() {
            return Err(ComputeError::InvalidDefinition {
                metric: def.code.clone(),
                reason: "composite metric without dependencies".to_string(),
            });
        }
        let formula = Formula::parse(formula_src)?;

        stack.push(def.code.clone());
        let mut bindings = HashMap::new();
        for dep_code in &def.depends_on {
            if stack.iter().any(|c| c == dep_code) {
                let mut chain = stack.clone();
                chain.push(dep_code.clone());
                return Err(ComputeError::DependencyCycle {
                    chain: chain.join(" -> "),
                });
            }

            let dep = self
                .store
                .definition_by_code(dep_code)
                .await?
                .ok_or_else(|| ComputeError::UnresolvedDependency {
                    metric: def.code.clone(),
                    dependency: dep_code.clone(),
                })?;

            tracing::debug!(metric = %def.code, dependency = %dep_code, "resolving composite dependency");
            let value = self
                .compute_recursive(&dep, period, dimensions, stack)
                .await?;
            bindings.insert(dep_code.clone(), value);
        }
        stack.pop();

        formula.evaluate(&bindings).map_err(|e| match e {
            FormulaError::NonFinite => ComputeError::NonFinite {
                metric: def.code.clone(),
            },
            other => ComputeError::Formula(other),
        })
    }

    /// Render the definition's query template and take the first scalar
    async fn run_query(
        &self,
        def: &MetricDefinition,
        period: Period,
        dimensions: &DimensionSet,
    ) -> ComputeResult<f64> {
        let query_template =
            def.query_template
                .as_deref()
                .ok_or_else(|| ComputeError::InvalidDefinition {
                    metric: def.code.clone(),
                    reason: "missing query template".to_string(),
                })?;

        let sql = template::render(query_template, &period, dimensions, def.percentile)?;
        tracing::debug!(metric = %def.code, period = %period, "executing metric query");

        let value = self
            .source
            .fetch_scalar(&sql)
            .await
            .map_err(|e| ComputeError::Query {
                metric: def.code.clone(),
                reason: e.to_string(),
            })?;

        // no rows (or a NULL aggregate) counts as zero
        Ok(value.unwrap_or(0.0))
    }
}

/// Percent change versus the preceding period, rounded to 2 decimals
fn rate_of_change(previous: f64, current: f64) -> f64 {
    let rate = if previous == 0.0 {
        if current > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (current - previous) / previous.abs() * 100.0
    };
    (rate * 100.0).round() / 100.0
}
