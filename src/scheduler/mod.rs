//! Collection scheduling
//!
//! The scheduler walks the stored configurations at startup and registers
//! one trigger per schedulable metric: a ticking task for interval and
//! cron schedules, a bus subscription for event schedules, nothing for
//! manual ones. Each trigger reloads its definition and configuration
//! before collecting, so catalog changes take effect on the next firing
//! without a restart. A failed run is logged and retried at the next
//! tick; the scheduler itself never dies with a metric.

pub mod alerts;
pub mod collector;
pub mod cron;
pub mod retention;

pub use collector::{CollectOutcome, CollectRequest, Collector};
pub use retention::RetentionOutcome;

use crate::analytics::{AnomalySweep, ConfidenceLevel};
use crate::events::{EventBus, EventPublisher, OutboundEvent};
use crate::model::{DimensionSet, MetricConfiguration, MetricDefinition, ScheduleKind};
use crate::store::{MetricStore, StoreError, StoreResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a metric currently sits in the collection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricState {
    /// No trigger registered (manual schedule, or unknown to the scheduler)
    Idle,
    /// Trigger registered, waiting for its next firing
    Scheduled,
    /// A collection run is in flight
    Running,
    /// Collection disabled by configuration
    Disabled,
}

/// Scheduler-level settings, from the service configuration
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Whether the periodic anomaly sweep runs
    pub sweep_enabled: bool,
    pub sweep_interval: Duration,
    pub sweep_confidence: ConfidenceLevel,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep_enabled: true,
            sweep_interval: Duration::from_secs(6 * 3600),
            sweep_confidence: ConfidenceLevel::Medium,
        }
    }
}

/// Registers and drives collection triggers
pub struct CollectionScheduler {
    store: Arc<dyn MetricStore>,
    collector: Arc<Collector>,
    bus: Arc<EventBus>,
    publisher: Arc<dyn EventPublisher>,
    settings: SchedulerSettings,
    states: RwLock<HashMap<i64, MetricState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CollectionScheduler {
    pub fn new(
        store: Arc<dyn MetricStore>,
        collector: Arc<Collector>,
        bus: Arc<EventBus>,
        publisher: Arc<dyn EventPublisher>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            collector,
            bus,
            publisher,
            settings,
            states: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Load every stored configuration and register its trigger; returns
    /// the number of triggers registered.
    pub async fn start(self: &Arc<Self>) -> StoreResult<usize> {
        let configs = self.store.list_configurations().await?;
        let mut registered = 0;

        for config in configs {
            let definition = match self.store.definition_by_id(config.metric_id).await? {
                Some(def) if def.active => def,
                Some(def) => {
                    debug!(metric = %def.code, "definition inactive, not scheduling");
                    continue;
                }
                None => {
                    warn!(
                        metric_id = config.metric_id,
                        "configuration without definition, skipping"
                    );
                    continue;
                }
            };

            if !config.collection_enabled {
                self.set_state(definition.id, MetricState::Disabled).await;
                continue;
            }

            match &config.schedule {
                ScheduleKind::Interval { seconds } => {
                    self.spawn_ticker(&definition, Duration::from_secs(*seconds as u64))
                        .await;
                    registered += 1;
                }
                ScheduleKind::Cron { expression } => {
                    match cron::approximate_interval(expression) {
                        Some(interval) => {
                            self.spawn_ticker(&definition, interval).await;
                            registered += 1;
                        }
                        // the catalog rejects these, but a row may predate the table
                        None => {
                            warn!(
                                metric = %definition.code,
                                expression,
                                "unsupported cron expression, metric not scheduled"
                            );
                            self.set_state(definition.id, MetricState::Idle).await;
                        }
                    }
                }
                ScheduleKind::Event { name } => {
                    self.spawn_listener(&definition, name).await;
                    registered += 1;
                }
                ScheduleKind::Manual => {
                    self.set_state(definition.id, MetricState::Idle).await;
                }
            }
        }

        if self.settings.sweep_enabled {
            self.spawn_sweep().await;
        }

        info!(registered, "collection scheduler started");
        Ok(registered)
    }

    /// Abort every registered trigger task
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("collection scheduler stopped");
    }

    /// Current lifecycle state of a metric
    pub async fn state(&self, metric_id: i64) -> MetricState {
        self.states
            .read()
            .await
            .get(&metric_id)
            .copied()
            .unwrap_or(MetricState::Idle)
    }

    /// Number of metrics with a registered trigger
    pub async fn scheduled_count(&self) -> usize {
        self.states
            .read()
            .await
            .values()
            .filter(|s| matches!(s, MetricState::Scheduled | MetricState::Running))
            .count()
    }

    /// Collect a metric on demand, regardless of its schedule.
    ///
    /// Works for any active metric; a metric with no stored configuration
    /// runs under the default policy.
    pub async fn collect_by_code(
        &self,
        code: &str,
        request: CollectRequest,
    ) -> StoreResult<CollectOutcome> {
        let definition = self
            .store
            .definition_by_code(code)
            .await?
            .ok_or_else(|| StoreError::DefinitionNotFound(code.to_string()))?;
        if !definition.active {
            return Err(StoreError::DefinitionNotFound(code.to_string()));
        }

        let config = match self.store.configuration_by_metric(definition.id).await? {
            Some(config) => config,
            None => MetricConfiguration::new(definition.id, ScheduleKind::Manual),
        };

        self.collector.collect(&definition, &config, request).await
    }

    /// One trigger firing: reload, collect, log. Never propagates.
    async fn run_once(&self, metric_id: i64, request: CollectRequest) {
        let definition = match self.store.definition_by_id(metric_id).await {
            Ok(Some(def)) if def.active => def,
            Ok(_) => {
                debug!(metric_id, "metric gone or inactive, trigger firing skipped");
                return;
            }
            Err(err) => {
                error!(metric_id, error = %err, "definition reload failed");
                return;
            }
        };
        let config = match self.store.configuration_by_metric(metric_id).await {
            Ok(Some(config)) if config.collection_enabled => config,
            Ok(_) => {
                self.set_state(metric_id, MetricState::Disabled).await;
                return;
            }
            Err(err) => {
                error!(metric = %definition.code, error = %err, "configuration reload failed");
                return;
            }
        };

        self.set_state(metric_id, MetricState::Running).await;
        match self.collector.collect(&definition, &config, request).await {
            Ok(outcome) if outcome.computed => {
                info!(
                    metric = %definition.code,
                    status = ?outcome.snapshot.status,
                    alerts = outcome.alerts_published,
                    "collection run finished"
                );
            }
            Ok(_) => {
                debug!(metric = %definition.code, "period already collected");
            }
            Err(err) => {
                error!(metric = %definition.code, error = %err, "collection run failed");
            }
        }
        self.set_state(metric_id, MetricState::Scheduled).await;
    }

    async fn spawn_ticker(self: &Arc<Self>, definition: &MetricDefinition, every: Duration) {
        self.set_state(definition.id, MetricState::Scheduled).await;
        info!(
            metric = %definition.code,
            interval_secs = every.as_secs(),
            "interval trigger registered"
        );

        let scheduler = Arc::clone(self);
        let metric_id = definition.id;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                scheduler.run_once(metric_id, CollectRequest::new()).await;
            }
        });
        self.tasks.lock().await.push(task);
    }

    async fn spawn_listener(self: &Arc<Self>, definition: &MetricDefinition, event_name: &str) {
        self.set_state(definition.id, MetricState::Scheduled).await;
        info!(
            metric = %definition.code,
            event = event_name,
            "event trigger registered"
        );

        let mut rx = self.bus.subscribe(event_name).await;
        let scheduler = Arc::clone(self);
        let metric_id = definition.id;
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let dimensions: DimensionSet =
                            event.string_fields().into_iter().collect();
                        let request = CollectRequest::new()
                            .dimensions(dimensions)
                            .metadata(event.payload.clone());
                        scheduler.run_once(metric_id, request).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(metric_id, missed, "event listener lagged, events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().await.push(task);
    }

    /// Periodic anomaly sweep over all active metrics; findings go out
    /// through the configured publisher.
    async fn spawn_sweep(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.settings.sweep_interval);
            // the immediate first tick would sweep an empty engine at boot
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sweep = AnomalySweep::new(
                    scheduler.store.clone(),
                    scheduler.settings.sweep_confidence,
                );
                match sweep.run().await {
                    Ok(findings) => {
                        info!(flagged = findings.len(), "anomaly sweep finished");
                        for finding in &findings {
                            let event = OutboundEvent::anomaly(finding);
                            if let Err(err) = scheduler.publisher.publish(&event).await {
                                warn!(
                                    metric = %finding.metric_code,
                                    error = %err,
                                    "anomaly notification failed"
                                );
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "anomaly sweep failed"),
                }
            }
        });
        self.tasks.lock().await.push(task);
    }

    async fn set_state(&self, metric_id: i64, state: MetricState) {
        self.states.write().await.insert(metric_id, state);
    }
}
