//! SQLite-backed metric store
//!
//! Definitions, configurations and snapshots live in three tables; JSON
//! columns hold the nested parts (schedule, alert rules, dimensions).
//! Timestamps are stored as RFC 3339 text in UTC, which compares
//! lexicographically in period order.
//!
//! The snapshot identity constraint is a UNIQUE index over
//! (definition_id, period_start, period_end, dimension_hash); it is the
//! only deduplication mechanism, including across processes sharing the
//! database file.

use crate::model::{
    Category, DefinitionFilter, Granularity, MetricConfiguration, MetricDefinition, MetricKind,
    MetricSnapshot, Period, SamplingStrategy, SnapshotKey, SnapshotStatus,
};
use crate::store::error::{StoreError, StoreResult};
use crate::store::MetricStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metric_definitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    kind TEXT NOT NULL,
    category TEXT NOT NULL,
    unit TEXT,
    prefix TEXT,
    suffix TEXT,
    decimal_places INTEGER NOT NULL DEFAULT 2,
    query_template TEXT,
    percentile REAL,
    formula TEXT,
    depends_on TEXT NOT NULL DEFAULT '[]',
    granularity TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    version INTEGER NOT NULL DEFAULT 1,
    last_collected_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metric_configurations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_id INTEGER NOT NULL UNIQUE REFERENCES metric_definitions(id),
    collection_enabled INTEGER NOT NULL DEFAULT 1,
    schedule TEXT NOT NULL,
    collection_timeout_secs INTEGER NOT NULL DEFAULT 30,
    max_age_days INTEGER NOT NULL DEFAULT 0,
    max_count INTEGER NOT NULL DEFAULT 0,
    sampling TEXT NOT NULL DEFAULT 'full',
    sample_size INTEGER,
    cache_enabled INTEGER NOT NULL DEFAULT 1,
    cache_ttl_secs INTEGER,
    alert_rules TEXT NOT NULL DEFAULT '[]',
    dashboard TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metric_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    definition_id INTEGER NOT NULL REFERENCES metric_definitions(id),
    definition_version INTEGER NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    granularity TEXT NOT NULL,
    value REAL,
    formatted_value TEXT,
    dimensions TEXT NOT NULL DEFAULT '{}',
    dimension_hash TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT 'null',
    compute_duration_ms INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error_message TEXT,
    collected_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_identity
    ON metric_snapshots(definition_id, period_start, period_end, dimension_hash);
CREATE INDEX IF NOT EXISTS idx_snapshots_series
    ON metric_snapshots(definition_id, period_start);
CREATE INDEX IF NOT EXISTS idx_definitions_active
    ON metric_definitions(active);
";

const DEFINITION_COLS: &str = "id, code, name, description, kind, category, unit, prefix, \
     suffix, decimal_places, query_template, percentile, formula, depends_on, granularity, \
     active, version, last_collected_at, created_at, updated_at";

const CONFIGURATION_COLS: &str = "id, metric_id, collection_enabled, schedule, \
     collection_timeout_secs, max_age_days, max_count, sampling, sample_size, cache_enabled, \
     cache_ttl_secs, alert_rules, dashboard, created_at, updated_at";

const SNAPSHOT_COLS: &str = "id, definition_id, definition_version, period_start, period_end, \
     granularity, value, formatted_value, dimensions, dimension_hash, metadata, \
     compute_duration_ms, status, error_message, collected_at";

/// SQLite persistence backend
pub struct SqliteStore {
    /// std::sync::Mutex because SQLite connections are !Sync
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests, ephemeral runs)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn enum_err(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown enum value '{}'", value).into(),
    )
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_ts(&text).map_err(|e| conversion_err(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_ts(&t).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_err(idx, e))
}

fn map_definition(row: &Row<'_>) -> rusqlite::Result<MetricDefinition> {
    let kind_text: String = row.get(4)?;
    let category_text: String = row.get(5)?;
    let granularity_text: String = row.get(14)?;

    Ok(MetricDefinition {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        kind: MetricKind::parse(&kind_text).ok_or_else(|| enum_err(4, &kind_text))?,
        category: Category::parse(&category_text).ok_or_else(|| enum_err(5, &category_text))?,
        unit: row.get(6)?,
        prefix: row.get(7)?,
        suffix: row.get(8)?,
        decimal_places: row.get(9)?,
        query_template: row.get(10)?,
        percentile: row.get(11)?,
        formula: row.get(12)?,
        depends_on: json_col(row, 13)?,
        granularity: Granularity::parse(&granularity_text)
            .ok_or_else(|| enum_err(14, &granularity_text))?,
        active: row.get(15)?,
        version: row.get(16)?,
        last_collected_at: opt_ts_col(row, 17)?,
        created_at: ts_col(row, 18)?,
        updated_at: ts_col(row, 19)?,
    })
}

fn map_configuration(row: &Row<'_>) -> rusqlite::Result<MetricConfiguration> {
    let sampling_text: String = row.get(7)?;

    Ok(MetricConfiguration {
        id: row.get(0)?,
        metric_id: row.get(1)?,
        collection_enabled: row.get(2)?,
        schedule: json_col(row, 3)?,
        collection_timeout_secs: row.get(4)?,
        retention: crate::model::RetentionPolicy {
            max_age_days: row.get(5)?,
            max_count: row.get(6)?,
        },
        sampling: SamplingStrategy::parse(&sampling_text)
            .ok_or_else(|| enum_err(7, &sampling_text))?,
        sample_size: row.get(8)?,
        cache_enabled: row.get(9)?,
        cache_ttl_secs: row.get(10)?,
        alert_rules: json_col(row, 11)?,
        dashboard: json_col(row, 12)?,
        created_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
    })
}

fn map_snapshot(row: &Row<'_>) -> rusqlite::Result<MetricSnapshot> {
    let granularity_text: String = row.get(5)?;
    let status_text: String = row.get(12)?;

    Ok(MetricSnapshot {
        id: row.get(0)?,
        definition_id: row.get(1)?,
        definition_version: row.get(2)?,
        period: Period {
            start: ts_col(row, 3)?,
            end: ts_col(row, 4)?,
        },
        granularity: Granularity::parse(&granularity_text)
            .ok_or_else(|| enum_err(5, &granularity_text))?,
        value: row.get(6)?,
        formatted_value: row.get(7)?,
        dimensions: json_col(row, 8)?,
        dimension_hash: row.get(9)?,
        metadata: json_col(row, 10)?,
        compute_duration_ms: row.get(11)?,
        status: SnapshotStatus::parse(&status_text).ok_or_else(|| enum_err(12, &status_text))?,
        error_message: row.get(13)?,
        collected_at: ts_col(row, 14)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Build WHERE clause and LIKE/equality params for a definition filter
fn filter_clauses(filter: &DefinitionFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    if !filter.include_inactive {
        clauses.push("active = 1".to_string());
    }
    if let Some(category) = filter.category {
        clauses.push("category = ?".to_string());
        params.push(category.to_string());
    }
    if let Some(kind) = filter.kind {
        clauses.push("kind = ?".to_string());
        params.push(kind.to_string());
    }
    if let Some(term) = &filter.search {
        clauses.push("(code LIKE ? OR name LIKE ?)".to_string());
        let like = format!("%{}%", term);
        params.push(like.clone());
        params.push(like);
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    (where_sql, params)
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn insert_definition(&self, def: &MetricDefinition) -> StoreResult<MetricDefinition> {
        let depends_on = serde_json::to_string(&def.depends_on)?;
        let conn = self.lock()?;

        let result = conn.execute(
            "INSERT INTO metric_definitions (code, name, description, kind, category, unit, \
             prefix, suffix, decimal_places, query_template, percentile, formula, depends_on, \
             granularity, active, version, last_collected_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                def.code,
                def.name,
                def.description,
                def.kind.to_string(),
                def.category.to_string(),
                def.unit,
                def.prefix,
                def.suffix,
                def.decimal_places,
                def.query_template,
                def.percentile,
                def.formula,
                depends_on,
                def.granularity.to_string(),
                def.active,
                def.version,
                def.last_collected_at.as_ref().map(ts),
                ts(&def.created_at),
                ts(&def.updated_at),
            ],
        );

        match result {
            Ok(_) => {
                let mut stored = def.clone();
                stored.id = conn.last_insert_rowid();
                Ok(stored)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateCode(def.code.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_definition(&self, def: &MetricDefinition) -> StoreResult<()> {
        let depends_on = serde_json::to_string(&def.depends_on)?;
        let conn = self.lock()?;

        // code is immutable and deliberately excluded from the update
        let updated = conn.execute(
            "UPDATE metric_definitions SET name = ?2, description = ?3, kind = ?4, \
             category = ?5, unit = ?6, prefix = ?7, suffix = ?8, decimal_places = ?9, \
             query_template = ?10, percentile = ?11, formula = ?12, depends_on = ?13, \
             granularity = ?14, active = ?15, version = ?16, updated_at = ?17 \
             WHERE id = ?1",
            params![
                def.id,
                def.name,
                def.description,
                def.kind.to_string(),
                def.category.to_string(),
                def.unit,
                def.prefix,
                def.suffix,
                def.decimal_places,
                def.query_template,
                def.percentile,
                def.formula,
                depends_on,
                def.granularity.to_string(),
                def.active,
                def.version,
                ts(&def.updated_at),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::DefinitionNotFound(format!("id {}", def.id)));
        }
        Ok(())
    }

    async fn definition_by_id(&self, id: i64) -> StoreResult<Option<MetricDefinition>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_definitions WHERE id = ?1",
            DEFINITION_COLS
        ))?;
        Ok(stmt.query_row(params![id], map_definition).optional()?)
    }

    async fn definition_by_code(&self, code: &str) -> StoreResult<Option<MetricDefinition>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_definitions WHERE code = ?1",
            DEFINITION_COLS
        ))?;
        Ok(stmt.query_row(params![code], map_definition).optional()?)
    }

    async fn list_definitions(
        &self,
        filter: &DefinitionFilter,
    ) -> StoreResult<Vec<MetricDefinition>> {
        let (where_sql, filter_params) = filter_clauses(filter);
        let mut sql = format!(
            "SELECT {} FROM metric_definitions{} ORDER BY code",
            DEFINITION_COLS, where_sql
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, filter.offset));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(filter_params.iter()), map_definition)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn count_definitions(&self, filter: &DefinitionFilter) -> StoreResult<u64> {
        let (where_sql, filter_params) = filter_clauses(filter);
        let sql = format!("SELECT COUNT(*) FROM metric_definitions{}", where_sql);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let count: i64 = stmt.query_row(rusqlite::params_from_iter(filter_params.iter()), |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    async fn touch_last_collected(&self, id: i64, when: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE metric_definitions SET last_collected_at = ?2 WHERE id = ?1",
            params![id, ts(&when)],
        )?;
        if updated == 0 {
            return Err(StoreError::DefinitionNotFound(format!("id {}", id)));
        }
        Ok(())
    }

    async fn upsert_configuration(
        &self,
        config: &MetricConfiguration,
    ) -> StoreResult<MetricConfiguration> {
        let schedule = serde_json::to_string(&config.schedule)?;
        let alert_rules = serde_json::to_string(&config.alert_rules)?;
        let dashboard = serde_json::to_string(&config.dashboard)?;
        let conn = self.lock()?;

        let result = conn.execute(
            "INSERT INTO metric_configurations (metric_id, collection_enabled, schedule, \
             collection_timeout_secs, max_age_days, max_count, sampling, sample_size, \
             cache_enabled, cache_ttl_secs, alert_rules, dashboard, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
             ON CONFLICT(metric_id) DO UPDATE SET \
             collection_enabled = excluded.collection_enabled, \
             schedule = excluded.schedule, \
             collection_timeout_secs = excluded.collection_timeout_secs, \
             max_age_days = excluded.max_age_days, \
             max_count = excluded.max_count, \
             sampling = excluded.sampling, \
             sample_size = excluded.sample_size, \
             cache_enabled = excluded.cache_enabled, \
             cache_ttl_secs = excluded.cache_ttl_secs, \
             alert_rules = excluded.alert_rules, \
             dashboard = excluded.dashboard, \
             updated_at = excluded.updated_at",
            params![
                config.metric_id,
                config.collection_enabled,
                schedule,
                config.collection_timeout_secs,
                config.retention.max_age_days,
                config.retention.max_count,
                config.sampling.to_string(),
                config.sample_size,
                config.cache_enabled,
                config.cache_ttl_secs,
                alert_rules,
                dashboard,
                ts(&config.created_at),
                ts(&config.updated_at),
            ],
        );

        if let Err(e) = result {
            if is_foreign_key_violation(&e) {
                return Err(StoreError::DefinitionNotFound(format!(
                    "id {}",
                    config.metric_id
                )));
            }
            return Err(e.into());
        }

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_configurations WHERE metric_id = ?1",
            CONFIGURATION_COLS
        ))?;
        Ok(stmt.query_row(params![config.metric_id], map_configuration)?)
    }

    async fn configuration_by_metric(
        &self,
        metric_id: i64,
    ) -> StoreResult<Option<MetricConfiguration>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_configurations WHERE metric_id = ?1",
            CONFIGURATION_COLS
        ))?;
        Ok(stmt
            .query_row(params![metric_id], map_configuration)
            .optional()?)
    }

    async fn list_configurations(&self) -> StoreResult<Vec<MetricConfiguration>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_configurations ORDER BY metric_id",
            CONFIGURATION_COLS
        ))?;
        let rows = stmt.query_map([], map_configuration)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn insert_snapshot(&self, snapshot: &MetricSnapshot) -> StoreResult<MetricSnapshot> {
        let dimensions = serde_json::to_string(&snapshot.dimensions)?;
        let metadata = serde_json::to_string(&snapshot.metadata)?;
        let conn = self.lock()?;

        let result = conn.execute(
            "INSERT INTO metric_snapshots (definition_id, definition_version, period_start, \
             period_end, granularity, value, formatted_value, dimensions, dimension_hash, \
             metadata, compute_duration_ms, status, error_message, collected_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                snapshot.definition_id,
                snapshot.definition_version,
                ts(&snapshot.period.start),
                ts(&snapshot.period.end),
                snapshot.granularity.to_string(),
                snapshot.value,
                snapshot.formatted_value,
                dimensions,
                snapshot.dimension_hash,
                metadata,
                snapshot.compute_duration_ms,
                snapshot.status.as_str(),
                snapshot.error_message,
                ts(&snapshot.collected_at),
            ],
        );

        match result {
            Ok(_) => {
                let mut stored = snapshot.clone();
                stored.id = conn.last_insert_rowid();
                Ok(stored)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateSnapshot {
                definition_id: snapshot.definition_id,
                dimension_hash: snapshot.dimension_hash.clone(),
            }),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::DefinitionNotFound(
                format!("id {}", snapshot.definition_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<MetricSnapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_snapshots WHERE definition_id = ?1 AND period_start = ?2 \
             AND period_end = ?3 AND dimension_hash = ?4",
            SNAPSHOT_COLS
        ))?;
        Ok(stmt
            .query_row(
                params![
                    key.definition_id,
                    ts(&key.period.start),
                    ts(&key.period.end),
                    key.dimension_hash
                ],
                map_snapshot,
            )
            .optional()?)
    }

    async fn latest_snapshot(
        &self,
        definition_id: i64,
        dimension_hash: Option<&str>,
    ) -> StoreResult<Option<MetricSnapshot>> {
        let conn = self.lock()?;
        match dimension_hash {
            Some(hash) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {} FROM metric_snapshots \
                     WHERE definition_id = ?1 AND dimension_hash = ?2 \
                     ORDER BY period_end DESC, id DESC LIMIT 1",
                    SNAPSHOT_COLS
                ))?;
                Ok(stmt
                    .query_row(params![definition_id, hash], map_snapshot)
                    .optional()?)
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {} FROM metric_snapshots WHERE definition_id = ?1 \
                     ORDER BY period_end DESC, id DESC LIMIT 1",
                    SNAPSHOT_COLS
                ))?;
                Ok(stmt
                    .query_row(params![definition_id], map_snapshot)
                    .optional()?)
            }
        }
    }

    async fn snapshot_series(
        &self,
        definition_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        dimension_hash: Option<&str>,
    ) -> StoreResult<Vec<MetricSnapshot>> {
        let conn = self.lock()?;
        let mut out = Vec::new();

        match dimension_hash {
            Some(hash) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {} FROM metric_snapshots \
                     WHERE definition_id = ?1 AND period_start >= ?2 AND period_start < ?3 \
                     AND dimension_hash = ?4 \
                     ORDER BY period_start ASC",
                    SNAPSHOT_COLS
                ))?;
                let rows = stmt.query_map(
                    params![definition_id, ts(&from), ts(&to), hash],
                    map_snapshot,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {} FROM metric_snapshots \
                     WHERE definition_id = ?1 AND period_start >= ?2 AND period_start < ?3 \
                     ORDER BY period_start ASC",
                    SNAPSHOT_COLS
                ))?;
                let rows =
                    stmt.query_map(params![definition_id, ts(&from), ts(&to)], map_snapshot)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }

        Ok(out)
    }

    async fn latest_snapshots_by_dimension(
        &self,
        definition_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<MetricSnapshot>> {
        let conn = self.lock()?;
        // Bare `id` resolves to the row holding MAX(period_end) within each
        // group (SQLite min/max aggregate behavior)
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM metric_snapshots WHERE id IN ( \
                 SELECT id FROM ( \
                     SELECT id, MAX(period_end) FROM metric_snapshots \
                     WHERE definition_id = ?1 AND status = 'success' AND period_end >= ?2 \
                     GROUP BY dimension_hash \
                 ) \
             ) ORDER BY dimension_hash",
            SNAPSHOT_COLS
        ))?;
        let rows = stmt.query_map(params![definition_id, ts(&since)], map_snapshot)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn delete_snapshots_older_than(
        &self,
        definition_id: i64,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM metric_snapshots WHERE definition_id = ?1 AND period_end < ?2",
            params![definition_id, ts(&cutoff)],
        )?;
        Ok(deleted as u64)
    }

    async fn delete_oldest_beyond(&self, definition_id: i64, keep: u32) -> StoreResult<u64> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM metric_snapshots WHERE definition_id = ?1 AND id NOT IN ( \
                 SELECT id FROM metric_snapshots WHERE definition_id = ?1 \
                 ORDER BY period_end DESC, id DESC LIMIT ?2 \
             )",
            params![definition_id, keep],
        )?;
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DimensionSet, ScheduleKind};
    use chrono::{Duration, TimeZone};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn sample_definition(code: &str) -> MetricDefinition {
        // distinct names per code so search assertions stay unambiguous
        MetricDefinition::new(code, code.replace('_', " "), MetricKind::Count, Granularity::Day)
            .category(Category::Requests)
            .query_template("SELECT COUNT(*) FROM requests")
    }

    fn day_period(day: u32) -> Period {
        let start = Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap();
        Period::try_new(start, start + Duration::days(1)).unwrap()
    }

    fn sample_snapshot(definition_id: i64, day: u32, value: f64) -> MetricSnapshot {
        MetricSnapshot::success(
            definition_id,
            1,
            day_period(day),
            Granularity::Day,
            value,
            format!("{:.2}", value),
            DimensionSet::new(),
        )
    }

    #[tokio::test]
    async fn test_definition_round_trip() {
        let store = store();
        let stored = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();
        assert!(stored.id > 0);

        let by_id = store.definition_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(by_id.code, "requests_received");
        assert_eq!(by_id.kind, MetricKind::Count);

        let by_code = store
            .definition_by_code("requests_received")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_code.id, stored.id);

        assert!(store.definition_by_code("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let store = store();
        store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        let err = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(code) if code == "requests_received"));
    }

    #[tokio::test]
    async fn test_update_definition() {
        let store = store();
        let mut stored = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        stored.name = "Requests".to_string();
        stored.version = 2;
        store.update_definition(&stored).await.unwrap();

        let reloaded = store.definition_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(reloaded.name, "Requests");
        assert_eq!(reloaded.version, 2);

        stored.id = 9999;
        assert!(matches!(
            store.update_definition(&stored).await,
            Err(StoreError::DefinitionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_definitions_with_filter() {
        let store = store();
        store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();
        store
            .insert_definition(
                &sample_definition("payments_total").category(Category::Payments),
            )
            .await
            .unwrap();

        let mut inactive = sample_definition("retired_metric");
        inactive.active = false;
        store.insert_definition(&inactive).await.unwrap();

        let all = store
            .list_definitions(&DefinitionFilter::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let with_inactive = store
            .list_definitions(&DefinitionFilter::new().include_inactive())
            .await
            .unwrap();
        assert_eq!(with_inactive.len(), 3);

        let payments = store
            .list_definitions(&DefinitionFilter::new().category(Category::Payments))
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].code, "payments_total");

        let searched = store
            .list_definitions(&DefinitionFilter::new().search("received"))
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].code, "requests_received");

        let paged = store
            .list_definitions(&DefinitionFilter::new().page(1, 1))
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);

        assert_eq!(
            store
                .count_definitions(&DefinitionFilter::new())
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_configuration_upsert() {
        let store = store();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        let config = MetricConfiguration::new(def.id, ScheduleKind::Interval { seconds: 300 });
        let stored = store.upsert_configuration(&config).await.unwrap();
        assert!(stored.id > 0);

        let mut changed = stored.clone();
        changed.collection_enabled = false;
        changed.retention = crate::model::RetentionPolicy::new(30, 100);
        let after = store.upsert_configuration(&changed).await.unwrap();
        assert_eq!(after.id, stored.id);
        assert!(!after.collection_enabled);
        assert_eq!(after.retention.max_age_days, 30);

        assert_eq!(store.list_configurations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_configuration_requires_definition() {
        let store = store();
        let config = MetricConfiguration::new(424242, ScheduleKind::Manual);
        assert!(matches!(
            store.upsert_configuration(&config).await,
            Err(StoreError::DefinitionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_identity_enforced() {
        let store = store();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        let snap = sample_snapshot(def.id, 10, 42.0);
        let stored = store.insert_snapshot(&snap).await.unwrap();
        assert!(stored.id > 0);

        let err = store.insert_snapshot(&snap).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSnapshot { .. }));

        let found = store.find_snapshot(&snap.key()).await.unwrap().unwrap();
        assert_eq!(found.id, stored.id);
        assert_eq!(found.value, Some(42.0));

        // same period, different dimensions is a distinct snapshot
        let mut other = MetricSnapshot::success(
            def.id,
            1,
            day_period(10),
            Granularity::Day,
            7.0,
            "7.00".to_string(),
            DimensionSet::new().with("region", "sul"),
        );
        other = other.duration_ms(5);
        store.insert_snapshot(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_snapshot_and_series() {
        let store = store();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        for day in [10, 11, 12] {
            store
                .insert_snapshot(&sample_snapshot(def.id, day, day as f64))
                .await
                .unwrap();
        }

        let latest = store.latest_snapshot(def.id, None).await.unwrap().unwrap();
        assert_eq!(latest.value, Some(12.0));

        let from = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 12, 0, 0, 0).unwrap();
        let series = store
            .snapshot_series(def.id, from, to, None)
            .await
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].value, Some(10.0));
        assert_eq!(series[1].value, Some(11.0));
    }

    #[tokio::test]
    async fn test_latest_snapshots_by_dimension() {
        let store = store();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        for day in [10, 11] {
            for region in ["sul", "norte"] {
                let snap = MetricSnapshot::success(
                    def.id,
                    1,
                    day_period(day),
                    Granularity::Day,
                    day as f64,
                    format!("{}.00", day),
                    DimensionSet::new().with("region", region),
                );
                store.insert_snapshot(&snap).await.unwrap();
            }
        }

        let since = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let latest = store
            .latest_snapshots_by_dimension(def.id, since)
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|s| s.value == Some(11.0)));
    }

    #[tokio::test]
    async fn test_retention_deletes() {
        let store = store();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();

        for day in 10..15 {
            store
                .insert_snapshot(&sample_snapshot(def.id, day, day as f64))
                .await
                .unwrap();
        }

        // age-based
        let cutoff = Utc.with_ymd_and_hms(2025, 3, 12, 0, 0, 0).unwrap();
        let deleted = store
            .delete_snapshots_older_than(def.id, cutoff)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        // count-based: keep the 3 most recent of the remaining 4
        let deleted = store.delete_oldest_beyond(def.id, 3).await.unwrap();
        assert_eq!(deleted, 1);

        let from = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let remaining = store.snapshot_series(def.id, from, to, None).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].value, Some(12.0));
    }

    #[tokio::test]
    async fn test_touch_last_collected() {
        let store = store();
        let def = store
            .insert_definition(&sample_definition("requests_received"))
            .await
            .unwrap();
        assert!(def.last_collected_at.is_none());

        let when = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        store.touch_last_collected(def.id, when).await.unwrap();

        let reloaded = store.definition_by_id(def.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_collected_at, Some(when));
    }
}
