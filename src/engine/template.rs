//! Query template rendering
//!
//! Metric definitions carry SQL templates with named placeholders that are
//! substituted at collection time:
//!
//! ```text
//! ${PERIODO_INICIO}   period start, RFC 3339
//! ${PERIODO_FIM}      period end (exclusive), RFC 3339
//! ${DIMENSAO.<key>}   value of the supplied dimension <key>
//! ${PERCENTIL}        the definition's percentile (percentile kind only)
//! ```
//!
//! The placeholder names are part of the definition format and are kept
//! as-is; queries are written against the benefits database schema by
//! operations staff.

use crate::model::period::Period;
use crate::model::snapshot::DimensionSet;
use chrono::SecondsFormat;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub const PLACEHOLDER_PERIOD_START: &str = "${PERIODO_INICIO}";
pub const PLACEHOLDER_PERIOD_END: &str = "${PERIODO_FIM}";
pub const PLACEHOLDER_PERCENTILE: &str = "${PERCENTIL}";

static DIMENSION_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{DIMENSAO\.([A-Za-z0-9_]+)\}").expect("valid pattern"));

/// Errors from template rendering
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateError {
    /// The template references a dimension the caller did not supply
    #[error("template references dimension '{0}' but no value was supplied")]
    UnboundDimension(String),

    /// The template references `${{PERCENTIL}}` but the definition carries none
    #[error("template references the percentile placeholder but the definition has no percentile")]
    MissingPercentile,
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Render a query template for a period, dimension set and optional percentile
pub fn render(
    template: &str,
    period: &Period,
    dimensions: &DimensionSet,
    percentile: Option<f64>,
) -> TemplateResult<String> {
    let mut sql = template.replace(
        PLACEHOLDER_PERIOD_START,
        &period.start.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    sql = sql.replace(
        PLACEHOLDER_PERIOD_END,
        &period.end.to_rfc3339_opts(SecondsFormat::Secs, true),
    );

    if sql.contains(PLACEHOLDER_PERCENTILE) {
        let p = percentile.ok_or(TemplateError::MissingPercentile)?;
        sql = sql.replace(PLACEHOLDER_PERCENTILE, &format_number(p));
    }

    substitute_dimensions(&sql, dimensions)
}

/// Replace every `${DIMENSAO.<key>}` with the supplied dimension value
fn substitute_dimensions(sql: &str, dimensions: &DimensionSet) -> TemplateResult<String> {
    // Verify every referenced key is bound before substituting
    for caps in DIMENSION_PLACEHOLDER.captures_iter(sql) {
        let key = &caps[1];
        if dimensions.get(key).is_none() {
            return Err(TemplateError::UnboundDimension(key.to_string()));
        }
    }

    let rendered = DIMENSION_PLACEHOLDER.replace_all(sql, |caps: &regex::Captures<'_>| {
        // Lookup cannot fail: all keys were verified above
        escape_value(dimensions.get(&caps[1]).unwrap_or_default())
    });

    Ok(rendered.into_owned())
}

/// Double single quotes so values stay inside their SQL string literal
fn escape_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Format a numeric placeholder value, dropping a trailing `.0`
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn day_period() -> Period {
        Period::try_new(
            Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_period_bounds_substituted() {
        let sql = render(
            "SELECT COUNT(*) FROM requests \
             WHERE created_at >= '${PERIODO_INICIO}' AND created_at < '${PERIODO_FIM}'",
            &day_period(),
            &DimensionSet::new(),
            None,
        )
        .unwrap();

        assert!(sql.contains("'2025-03-10T00:00:00Z'"));
        assert!(sql.contains("'2025-03-11T00:00:00Z'"));
        assert!(!sql.contains("${"));
    }

    #[test]
    fn test_dimension_substitution() {
        let dims = DimensionSet::new()
            .with("region", "sudeste")
            .with("benefit", "bpc");

        let sql = render(
            "SELECT COUNT(*) FROM grants \
             WHERE region = '${DIMENSAO.region}' AND benefit = '${DIMENSAO.benefit}' \
             AND region <> '${DIMENSAO.region}_x'",
            &day_period(),
            &dims,
            None,
        )
        .unwrap();

        assert!(sql.contains("region = 'sudeste'"));
        assert!(sql.contains("benefit = 'bpc'"));
        // repeated placeholders are all substituted
        assert!(sql.contains("'sudeste_x'"));
    }

    #[test]
    fn test_unbound_dimension_rejected() {
        let err = render(
            "SELECT 1 WHERE uf = '${DIMENSAO.uf}'",
            &day_period(),
            &DimensionSet::new(),
            None,
        )
        .unwrap_err();

        assert_eq!(err, TemplateError::UnboundDimension("uf".to_string()));
    }

    #[test]
    fn test_percentile_substitution() {
        let sql = render(
            "SELECT percentile_cont(${PERCENTIL}) FROM durations",
            &day_period(),
            &DimensionSet::new(),
            Some(95.0),
        )
        .unwrap();
        assert!(sql.contains("percentile_cont(95)"));

        let sql = render(
            "SELECT percentile_cont(${PERCENTIL}) FROM durations",
            &day_period(),
            &DimensionSet::new(),
            Some(99.9),
        )
        .unwrap();
        assert!(sql.contains("percentile_cont(99.9)"));
    }

    #[test]
    fn test_percentile_placeholder_without_value() {
        let err = render(
            "SELECT percentile_cont(${PERCENTIL}) FROM durations",
            &day_period(),
            &DimensionSet::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, TemplateError::MissingPercentile);
    }

    #[test]
    fn test_quotes_in_dimension_values_escaped() {
        let dims = DimensionSet::new().with("name", "d'avila");
        let sql = render(
            "SELECT 1 WHERE name = '${DIMENSAO.name}'",
            &day_period(),
            &dims,
            None,
        )
        .unwrap();
        assert!(sql.contains("'d''avila'"));
    }

    #[test]
    fn test_template_without_placeholders_passes_through() {
        let sql = render(
            "SELECT COUNT(*) FROM requests",
            &day_period(),
            &DimensionSet::new().with("unused", "x"),
            None,
        )
        .unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM requests");
    }
}
