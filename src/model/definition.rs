//! Metric definitions
//!
//! A `MetricDefinition` is the named, versioned specification of what is
//! measured and how: either a query template executed against the data
//! source, or (for composite metrics) an arithmetic formula over other
//! metrics' values. Definitions are soft-deactivated, never deleted, and
//! every update bumps `version` so historical snapshots stay attributable.

use crate::model::error::{ValidationError, ValidationResult};
use crate::model::period::Granularity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What computation a metric performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Row count from the query template
    Count,
    /// Sum of a column
    Sum,
    /// Average of a column
    Average,
    /// Minimum of a column
    Minimum,
    /// Maximum of a column
    Maximum,
    /// Percentile of a column (the query computes it; see `percentile`)
    Percentile,
    /// Distinct-value count
    Cardinality,
    /// Percentage change versus the immediately preceding period
    RateOfChange,
    /// Arithmetic formula over other metrics' values
    Composite,
}

impl MetricKind {
    /// Get all kinds for iteration
    pub fn all() -> &'static [MetricKind] {
        &[
            MetricKind::Count,
            MetricKind::Sum,
            MetricKind::Average,
            MetricKind::Minimum,
            MetricKind::Maximum,
            MetricKind::Percentile,
            MetricKind::Cardinality,
            MetricKind::RateOfChange,
            MetricKind::Composite,
        ]
    }

    /// Whether this kind runs the definition's query template
    pub fn is_query_backed(&self) -> bool {
        !matches!(self, MetricKind::Composite)
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "average" | "avg" => Some(Self::Average),
            "minimum" | "min" => Some(Self::Minimum),
            "maximum" | "max" => Some(Self::Maximum),
            "percentile" => Some(Self::Percentile),
            "cardinality" => Some(Self::Cardinality),
            "rate_of_change" | "rate" => Some(Self::RateOfChange),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
            Self::Percentile => "percentile",
            Self::Cardinality => "cardinality",
            Self::RateOfChange => "rate_of_change",
            Self::Composite => "composite",
        };
        write!(f, "{}", s)
    }
}

/// Business area a metric belongs to, for organization and display
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Benefit requests (intake volume, approval rates)
    Requests,
    /// Active grants and concessions
    Grants,
    /// Disbursements and payment runs
    Payments,
    /// Beneficiary population
    Beneficiaries,
    /// Operational/system health
    Performance,
    /// User-defined category
    Custom,
}

impl Category {
    /// Get all categories for iteration
    pub fn all() -> &'static [Category] {
        &[
            Category::Requests,
            Category::Grants,
            Category::Payments,
            Category::Beneficiaries,
            Category::Performance,
            Category::Custom,
        ]
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "requests" => Some(Self::Requests),
            "grants" => Some(Self::Grants),
            "payments" => Some(Self::Payments),
            "beneficiaries" => Some(Self::Beneficiaries),
            "performance" => Some(Self::Performance),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Requests => "requests",
            Self::Grants => "grants",
            Self::Payments => "payments",
            Self::Beneficiaries => "beneficiaries",
            Self::Performance => "performance",
            Self::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// Definition of a business metric
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDefinition {
    /// Surrogate identifier, assigned by the store (0 before persistence)
    pub id: i64,
    /// Stable, immutable business identifier (lowercase snake_case)
    pub code: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// What computation the metric performs
    pub kind: MetricKind,
    /// Business area
    pub category: Category,
    /// Unit of measurement for display (e.g., "requests", "BRL")
    #[serde(default)]
    pub unit: Option<String>,
    /// Display prefix (e.g., "R$ ")
    #[serde(default)]
    pub prefix: Option<String>,
    /// Display suffix (e.g., "%")
    #[serde(default)]
    pub suffix: Option<String>,
    /// Decimal places used when formatting the value
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u8,
    /// Query template with `${PERIODO_INICIO}`/`${PERIODO_FIM}` placeholders
    /// (query-backed kinds only)
    #[serde(default)]
    pub query_template: Option<String>,
    /// Percentile in (0, 100], substituted as `${PERCENTIL}` (percentile kind)
    #[serde(default)]
    pub percentile: Option<f64>,
    /// Arithmetic formula over dependent metric codes (composite kind)
    #[serde(default)]
    pub formula: Option<String>,
    /// Codes of metrics this composite depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Time bucket the metric is computed over
    pub granularity: Granularity,
    /// Soft-deactivation flag; inactive metrics are never collected
    #[serde(default = "default_active")]
    pub active: bool,
    /// Monotonically increasing revision, bumped on every update
    #[serde(default = "default_version")]
    pub version: i64,
    /// When a snapshot was last collected for this metric
    #[serde(default)]
    pub last_collected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_decimal_places() -> u8 {
    2
}

fn default_active() -> bool {
    true
}

fn default_version() -> i64 {
    1
}

impl MetricDefinition {
    /// Create a new definition with required fields
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        kind: MetricKind,
        granularity: Granularity,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            code: code.into(),
            name: name.into(),
            description: None,
            kind,
            category: Category::Custom,
            unit: None,
            prefix: None,
            suffix: None,
            decimal_places: default_decimal_places(),
            query_template: None,
            percentile: None,
            formula: None,
            depends_on: Vec::new(),
            granularity,
            active: true,
            version: 1,
            last_collected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Builder: set category
    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Builder: set the query template
    pub fn query_template(mut self, template: impl Into<String>) -> Self {
        self.query_template = Some(template.into());
        self
    }

    /// Builder: set the percentile (percentile kind)
    pub fn percentile(mut self, p: f64) -> Self {
        self.percentile = Some(p);
        self
    }

    /// Builder: set the formula and dependent codes (composite kind)
    pub fn formula(
        mut self,
        formula: impl Into<String>,
        depends_on: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.formula = Some(formula.into());
        self.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set display attributes
    pub fn display(
        mut self,
        prefix: Option<&str>,
        suffix: Option<&str>,
        decimal_places: u8,
    ) -> Self {
        self.prefix = prefix.map(str::to_string);
        self.suffix = suffix.map(str::to_string);
        self.decimal_places = decimal_places;
        self
    }

    /// Builder: set the unit of measurement
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Whether this is a composite (formula-based) metric
    pub fn is_composite(&self) -> bool {
        self.kind == MetricKind::Composite
    }

    /// Format a raw value per the definition's display rules
    pub fn format_value(&self, value: f64) -> String {
        format!(
            "{}{:.*}{}",
            self.prefix.as_deref().unwrap_or(""),
            self.decimal_places as usize,
            value,
            self.suffix.as_deref().unwrap_or("")
        )
    }

    /// Structural validation of the definition
    ///
    /// Formula parseability and cron-expression checks are performed by the
    /// catalog, which owns the definition lifecycle.
    pub fn validate(&self) -> ValidationResult<()> {
        if !valid_code(&self.code) {
            return Err(ValidationError::InvalidCode(self.code.clone()));
        }

        match self.kind {
            MetricKind::Composite => {
                if self.formula.as_deref().map_or(true, |f| f.trim().is_empty()) {
                    return Err(ValidationError::MissingFormula(self.code.clone()));
                }
                if self.depends_on.is_empty() {
                    return Err(ValidationError::MissingDependencies(self.code.clone()));
                }
                if self.depends_on.iter().any(|dep| dep == &self.code) {
                    return Err(ValidationError::SelfDependency(self.code.clone()));
                }
            }
            MetricKind::Percentile => {
                if self
                    .query_template
                    .as_deref()
                    .map_or(true, |q| q.trim().is_empty())
                {
                    return Err(ValidationError::MissingQueryTemplate(self.code.clone()));
                }
                match self.percentile {
                    Some(p) if p > 0.0 && p <= 100.0 => {}
                    _ => return Err(ValidationError::InvalidPercentile(self.code.clone())),
                }
            }
            _ => {
                if self
                    .query_template
                    .as_deref()
                    .map_or(true, |q| q.trim().is_empty())
                {
                    return Err(ValidationError::MissingQueryTemplate(self.code.clone()));
                }
            }
        }

        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "name",
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Check a metric code against the identifier pattern:
/// lowercase letter first, then lowercase letters, digits or underscores,
/// 3 to 64 characters total.
pub fn valid_code(code: &str) -> bool {
    let len = code.len();
    if !(3..=64).contains(&len) {
        return false;
    }
    let mut chars = code.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Filter for listing definitions
#[derive(Debug, Clone, Default)]
pub struct DefinitionFilter {
    /// Restrict to a category
    pub category: Option<Category>,
    /// Restrict to a kind
    pub kind: Option<MetricKind>,
    /// Include deactivated definitions
    pub include_inactive: bool,
    /// Case-insensitive substring match on code or name
    pub search: Option<String>,
    /// Page size (None = unbounded)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: u32,
}

impl DefinitionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn kind(mut self, kind: MetricKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn include_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Check whether a definition matches this filter
    pub fn matches(&self, def: &MetricDefinition) -> bool {
        if !self.include_inactive && !def.active {
            return false;
        }
        if let Some(cat) = self.category {
            if def.category != cat {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if def.kind != kind {
                return false;
            }
        }
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            if !def.code.to_lowercase().contains(&term)
                && !def.name.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        true
    }
}
