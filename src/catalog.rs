//! Metric catalog
//!
//! The catalog owns the definition lifecycle: it is the only path through
//! which definitions and configurations are created or changed, so every
//! write passes the same validation gate. Reads by code go through the
//! cache; writes bump the definition version and invalidate every cached
//! entry for that metric.

use crate::cache::MetricCache;
use crate::engine::Formula;
use crate::model::{
    DefinitionFilter, MetricConfiguration, MetricDefinition, ScheduleKind, ValidationError,
};
use crate::scheduler::cron;
use crate::store::{MetricStore, StoreError};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Definition and configuration lifecycle, with cached reads
pub struct MetricCatalog {
    store: Arc<dyn MetricStore>,
    cache: Arc<MetricCache>,
}

impl MetricCatalog {
    pub fn new(store: Arc<dyn MetricStore>, cache: Arc<MetricCache>) -> Self {
        Self { store, cache }
    }

    /// Register a new metric definition.
    ///
    /// Composite formulas must parse and reference only declared
    /// dependencies; the code must be unique among all definitions,
    /// deactivated ones included.
    pub async fn create(&self, definition: MetricDefinition) -> CatalogResult<MetricDefinition> {
        definition.validate()?;
        check_formula(&definition)?;

        let created = self.store.insert_definition(&definition).await?;
        info!(metric = %created.code, id = created.id, "metric registered");
        Ok(created)
    }

    /// Update an existing definition.
    ///
    /// The code is immutable (enforced by the store); the kind is frozen
    /// once the metric has collected snapshots, so history stays
    /// comparable. Every accepted update bumps the version.
    pub async fn update(&self, mut definition: MetricDefinition) -> CatalogResult<MetricDefinition> {
        definition.validate()?;
        check_formula(&definition)?;

        let existing = self
            .store
            .definition_by_id(definition.id)
            .await?
            .ok_or_else(|| StoreError::DefinitionNotFound(definition.code.clone()))?;

        if definition.kind != existing.kind {
            let has_history = self
                .store
                .latest_snapshot(existing.id, None)
                .await?
                .is_some();
            if has_history {
                return Err(ValidationError::KindChangeForbidden(existing.code).into());
            }
        }

        definition.version = existing.version + 1;
        definition.created_at = existing.created_at;
        definition.updated_at = Utc::now();

        self.store.update_definition(&definition).await?;
        self.cache.invalidate(definition.id).await;
        info!(metric = %definition.code, version = definition.version, "metric updated");
        Ok(definition)
    }

    /// Soft-deactivate a definition; snapshots and history are untouched.
    /// Deactivating an already inactive metric is a no-op.
    pub async fn deactivate(&self, code: &str) -> CatalogResult<MetricDefinition> {
        let mut definition = self.require(code).await?;
        if !definition.active {
            return Ok(definition);
        }

        definition.active = false;
        definition.version += 1;
        definition.updated_at = Utc::now();

        self.store.update_definition(&definition).await?;
        self.cache.invalidate(definition.id).await;
        info!(metric = %definition.code, "metric deactivated");
        Ok(definition)
    }

    /// Look up a definition by code, read-through cached
    pub async fn definition_by_code(&self, code: &str) -> CatalogResult<Option<MetricDefinition>> {
        if let Some(cached) = self.cache.definition(code).await {
            return Ok(Some(cached));
        }
        match self.store.definition_by_code(code).await? {
            Some(definition) => {
                self.cache.put_definition(&definition, None).await;
                Ok(Some(definition))
            }
            None => Ok(None),
        }
    }

    /// Look up a definition by code, or fail with `DefinitionNotFound`
    pub async fn require(&self, code: &str) -> CatalogResult<MetricDefinition> {
        self.definition_by_code(code)
            .await?
            .ok_or_else(|| StoreError::DefinitionNotFound(code.to_string()).into())
    }

    pub async fn list(&self, filter: &DefinitionFilter) -> CatalogResult<Vec<MetricDefinition>> {
        Ok(self.store.list_definitions(filter).await?)
    }

    pub async fn count(&self, filter: &DefinitionFilter) -> CatalogResult<u64> {
        Ok(self.store.count_definitions(filter).await?)
    }

    /// Attach or replace the configuration for a metric.
    ///
    /// Cron schedules outside the supported approximation table are
    /// rejected here rather than silently skipped at scheduler load.
    pub async fn configure(
        &self,
        mut config: MetricConfiguration,
    ) -> CatalogResult<MetricConfiguration> {
        config.validate()?;

        if let ScheduleKind::Cron { expression } = &config.schedule {
            if !cron::is_supported(expression) {
                return Err(ValidationError::InvalidCronSchedule {
                    metric_id: config.metric_id,
                    reason: format!("expression '{}' is not a supported pattern", expression),
                }
                .into());
            }
        }

        let definition = self
            .store
            .definition_by_id(config.metric_id)
            .await?
            .ok_or(StoreError::ConfigurationNotFound(config.metric_id))?;

        config.updated_at = Utc::now();
        let stored = self.store.upsert_configuration(&config).await?;
        self.cache.invalidate(definition.id).await;
        info!(
            metric = %definition.code,
            schedule = stored.schedule.kind_name(),
            "configuration saved"
        );
        Ok(stored)
    }

    pub async fn configuration_for(
        &self,
        metric_id: i64,
    ) -> CatalogResult<Option<MetricConfiguration>> {
        Ok(self.store.configuration_by_metric(metric_id).await?)
    }
}

/// Composite-only: the formula must parse and reference exactly the
/// declared dependency codes.
fn check_formula(definition: &MetricDefinition) -> Result<(), ValidationError> {
    if !definition.is_composite() {
        return Ok(());
    }
    let source = definition.formula.as_deref().unwrap_or_default();
    let formula = Formula::parse(source).map_err(|err| ValidationError::MalformedFormula {
        metric: definition.code.clone(),
        reason: err.to_string(),
    })?;

    for variable in formula.variables() {
        if !definition.depends_on.iter().any(|dep| dep == &variable) {
            return Err(ValidationError::MalformedFormula {
                metric: definition.code.clone(),
                reason: format!("formula references undeclared metric '{}'", variable),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, DimensionSet, Granularity, MetricKind, MetricSnapshot};
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn catalog() -> (Arc<InMemoryStore>, MetricCatalog) {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MetricCache::new(Duration::from_secs(60)));
        let catalog = MetricCatalog::new(store.clone(), cache);
        (store, catalog)
    }

    fn count_metric(code: &str) -> MetricDefinition {
        MetricDefinition::new(code, "Requests received", MetricKind::Count, Granularity::Day)
            .category(Category::Requests)
            .query_template(
                "SELECT COUNT(*) FROM requests \
                 WHERE created_at >= '${PERIODO_INICIO}' AND created_at < '${PERIODO_FIM}'",
            )
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_caches_nothing_until_read() {
        let (_, catalog) = catalog();
        let created = catalog.create(count_metric("requests_received")).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.version, 1);

        let found = catalog.require("requests_received").await.unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_definition() {
        let (_, catalog) = catalog();
        let missing_query = MetricDefinition::new(
            "requests_received",
            "Requests received",
            MetricKind::Count,
            Granularity::Day,
        );
        let err = catalog.create(missing_query).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_code() {
        let (_, catalog) = catalog();
        catalog.create(count_metric("requests_received")).await.unwrap();
        let err = catalog
            .create(count_metric("requests_received"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Store(StoreError::DuplicateCode(_))));
    }

    #[tokio::test]
    async fn test_composite_formula_must_parse() {
        let (_, catalog) = catalog();
        let broken = MetricDefinition::new(
            "approval_rate",
            "Approval rate",
            MetricKind::Composite,
            Granularity::Day,
        )
        .formula("approved_count / * 100", ["approved_count"]);

        let err = catalog.create(broken).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(ValidationError::MalformedFormula { .. })
        ));
    }

    #[tokio::test]
    async fn test_composite_formula_variables_must_be_declared() {
        let (_, catalog) = catalog();
        let undeclared = MetricDefinition::new(
            "approval_rate",
            "Approval rate",
            MetricKind::Composite,
            Granularity::Day,
        )
        .formula("approved_count / total_count * 100", ["approved_count"]);

        let err = catalog.create(undeclared).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(ValidationError::MalformedFormula { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let (store, catalog) = catalog();
        let created = catalog.create(count_metric("requests_received")).await.unwrap();

        let mut changed = created.clone();
        changed.name = "Benefit requests received".to_string();
        let updated = catalog.update(changed).await.unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Benefit requests received");
        assert_eq!(updated.created_at, created.created_at);

        // the returned definition reflects what was persisted
        let stored = store
            .definition_by_id(created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, updated.version);
        assert_eq!(stored.name, updated.name);
    }

    #[tokio::test]
    async fn test_kind_frozen_once_snapshots_exist() {
        let (store, catalog) = catalog();
        let created = catalog.create(count_metric("requests_received")).await.unwrap();

        let period = Granularity::Day.last_complete(Utc::now());
        store
            .insert_snapshot(&MetricSnapshot::success(
                created.id,
                created.version,
                period,
                Granularity::Day,
                10.0,
                "10".to_string(),
                DimensionSet::new(),
            ))
            .await
            .unwrap();

        let mut changed = created.clone();
        changed.kind = MetricKind::Sum;
        let err = catalog.update(changed).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(ValidationError::KindChangeForbidden(_))
        ));

        // without history the kind may still change
        let other = catalog.create(count_metric("requests_pending")).await.unwrap();
        let mut retyped = other.clone();
        retyped.kind = MetricKind::Sum;
        assert!(catalog.update(retyped).await.is_ok());
    }

    #[tokio::test]
    async fn test_deactivate_is_soft_and_idempotent() {
        let (store, catalog) = catalog();
        catalog.create(count_metric("requests_received")).await.unwrap();

        let deactivated = catalog.deactivate("requests_received").await.unwrap();
        assert!(!deactivated.active);
        assert_eq!(deactivated.version, 2);

        // the row is still there, just inactive
        let raw = store.definition_by_code("requests_received").await.unwrap();
        assert!(raw.is_some());

        // cache was invalidated, so the lookup sees the inactive row
        let again = catalog.deactivate("requests_received").await.unwrap();
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn test_configure_validates_cron_expression() {
        let (_, catalog) = catalog();
        let created = catalog.create(count_metric("requests_received")).await.unwrap();

        let supported = MetricConfiguration::new(
            created.id,
            ScheduleKind::Cron {
                expression: "0 3 * * *".to_string(),
            },
        );
        assert!(catalog.configure(supported).await.is_ok());

        let exotic = MetricConfiguration::new(
            created.id,
            ScheduleKind::Cron {
                expression: "0 9-17 * * 1-5".to_string(),
            },
        );
        let err = catalog.configure(exotic).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation(ValidationError::InvalidCronSchedule { .. })
        ));
    }

    #[tokio::test]
    async fn test_configure_requires_existing_definition() {
        let (_, catalog) = catalog();
        let config = MetricConfiguration::new(999, ScheduleKind::Manual);
        let err = catalog.configure(config).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Store(StoreError::ConfigurationNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_require_unknown_code() {
        let (_, catalog) = catalog();
        let err = catalog.require("no_such_metric").await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Store(StoreError::DefinitionNotFound(_))
        ));
    }
}
