//! Cron schedule approximation
//!
//! The engine carries no full cron parser. Cron-scheduled metrics are
//! mapped onto fixed collection intervals through a table of common
//! patterns; anything outside the table is rejected when the
//! configuration is saved. The approximation keeps the cadence but not
//! the phase: a `0 3 * * *` metric collects every 24 hours from scheduler
//! start, not at 03:00 sharp. Known limitation, documented here.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static STEP_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*/([0-9]{1,4})$").expect("valid pattern"));

const MINUTE: u64 = 60;
const HOUR: u64 = 3_600;
const DAY: u64 = 86_400;

/// Interval a cron expression is approximated to, or None when the
/// pattern is not in the table.
pub fn approximate_interval(expression: &str) -> Option<Duration> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    let [minute, hour, dom, month, dow] = [fields[0], fields[1], fields[2], fields[3], fields[4]];
    let wild = |f: &str| f == "*";

    let seconds = if wild(minute) && wild(hour) && wild(dom) && wild(month) && wild(dow) {
        // every minute
        MINUTE
    } else if wild(hour) && wild(dom) && wild(month) && wild(dow) {
        if let Some(step) = step_of(minute) {
            // every N minutes
            step * MINUTE
        } else if fixed(minute) {
            // hourly at a fixed minute
            HOUR
        } else {
            return None;
        }
    } else if fixed(minute) && wild(dom) && wild(month) && wild(dow) {
        if let Some(step) = step_of(hour) {
            // every N hours
            step * HOUR
        } else if fixed(hour) {
            // daily at a fixed time
            DAY
        } else {
            return None;
        }
    } else if fixed(minute) && fixed(hour) && wild(dom) && wild(month) && fixed(dow) {
        // weekly on a fixed weekday
        7 * DAY
    } else if fixed(minute) && fixed(hour) && fixed(dom) && wild(month) && wild(dow) {
        // monthly on a fixed day
        30 * DAY
    } else if fixed(minute) && fixed(hour) && fixed(dom) && fixed(month) && wild(dow) {
        // yearly
        365 * DAY
    } else {
        return None;
    };

    Some(Duration::from_secs(seconds))
}

/// Whether the expression is in the approximation table
pub fn is_supported(expression: &str) -> bool {
    approximate_interval(expression).is_some()
}

/// Step of a `*/N` field, for N >= 1
fn step_of(field: &str) -> Option<u64> {
    STEP_FIELD
        .captures(field)?
        .get(1)?
        .as_str()
        .parse::<u64>()
        .ok()
        .filter(|&n| n > 0)
}

fn fixed(field: &str) -> bool {
    field.parse::<u32>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(expression: &str) -> Option<u64> {
        approximate_interval(expression).map(|d| d.as_secs())
    }

    #[test]
    fn test_common_patterns() {
        assert_eq!(secs("* * * * *"), Some(60));
        assert_eq!(secs("*/5 * * * *"), Some(300));
        assert_eq!(secs("*/15 * * * *"), Some(900));
        assert_eq!(secs("0 * * * *"), Some(3_600));
        assert_eq!(secs("30 * * * *"), Some(3_600));
        assert_eq!(secs("0 */6 * * *"), Some(21_600));
        assert_eq!(secs("0 0 * * *"), Some(86_400));
        assert_eq!(secs("15 3 * * *"), Some(86_400));
        assert_eq!(secs("0 0 * * 1"), Some(7 * 86_400));
        assert_eq!(secs("0 0 1 * *"), Some(30 * 86_400));
        assert_eq!(secs("0 0 1 1 *"), Some(365 * 86_400));
    }

    #[test]
    fn test_whitespace_is_normalized() {
        assert_eq!(secs("  0   0  *  *  * "), Some(86_400));
    }

    #[test]
    fn test_unsupported_patterns() {
        assert_eq!(secs(""), None);
        assert_eq!(secs("0 0 * *"), None);
        assert_eq!(secs("0 0 * * * *"), None);
        // ranges and lists are outside the table
        assert_eq!(secs("0 9-17 * * *"), None);
        assert_eq!(secs("0,30 * * * *"), None);
        // zero step would never fire
        assert_eq!(secs("*/0 * * * *"), None);
        // day-of-month plus day-of-week is ambiguous
        assert_eq!(secs("0 0 1 * 1"), None);
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("*/10 * * * *"));
        assert!(!is_supported("not a cron"));
    }
}
