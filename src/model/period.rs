//! Collection periods and granularities
//!
//! A `Period` is the half-open UTC interval `[start, end)` a metric value is
//! computed over. Periods are always derived from a `Granularity`: the
//! scheduler collects over the last *complete* bucket ending at "now", and
//! rate-of-change metrics additionally look at the immediately preceding
//! period of equal length.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Time bucket size a metric is computed over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    /// Get all granularities for iteration
    pub fn all() -> &'static [Granularity] {
        &[
            Granularity::Minute,
            Granularity::Hour,
            Granularity::Day,
            Granularity::Week,
            Granularity::Month,
            Granularity::Year,
        ]
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minute" | "min" => Some(Self::Minute),
            "hour" | "h" => Some(Self::Hour),
            "day" | "d" => Some(Self::Day),
            "week" | "w" => Some(Self::Week),
            "month" | "m" => Some(Self::Month),
            "year" | "y" => Some(Self::Year),
            _ => None,
        }
    }

    /// Truncate an instant to the start of the bucket containing it
    pub fn truncate(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = |d: DateTime<Utc>| {
            d.with_hour(0)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(d)
        };

        match self {
            Self::Minute => dt
                .with_second(0)
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(dt),
            Self::Hour => dt
                .with_minute(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(dt),
            Self::Day => day_start(dt),
            Self::Week => {
                let days_since_monday = dt.weekday().num_days_from_monday() as i64;
                day_start(dt - Duration::days(days_since_monday))
            }
            Self::Month => day_start(dt.with_day(1).unwrap_or(dt)),
            Self::Year => {
                day_start(dt.with_month(1).and_then(|d| d.with_day(1)).unwrap_or(dt))
            }
        }
    }

    /// The last complete bucket ending at or before `now`
    ///
    /// With `Granularity::Day` at 14:30 this is yesterday's full day; the
    /// bucket currently in progress is never collected.
    pub fn last_complete(&self, now: DateTime<Utc>) -> Period {
        let current_start = self.truncate(now);
        let previous_start = match self {
            Self::Minute => current_start - Duration::minutes(1),
            Self::Hour => current_start - Duration::hours(1),
            Self::Day => current_start - Duration::days(1),
            Self::Week => current_start - Duration::weeks(1),
            Self::Month => {
                let (y, m) = if current_start.month() == 1 {
                    (current_start.year() - 1, 12)
                } else {
                    (current_start.year(), current_start.month() - 1)
                };
                current_start
                    .with_year(y)
                    .and_then(|d| d.with_month(m))
                    .unwrap_or(current_start - Duration::days(30))
            }
            Self::Year => current_start
                .with_year(current_start.year() - 1)
                .unwrap_or(current_start - Duration::days(365)),
        };
        Period {
            start: previous_start,
            end: current_start,
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Year => write!(f, "year"),
        }
    }
}

/// Half-open interval `[start, end)` a metric value is computed over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// Create a period, returning None when `start >= end`
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The immediately preceding period of equal length
    pub fn previous(&self) -> Period {
        let len = self.end - self.start;
        Period {
            start: self.start - len,
            end: self.start,
        }
    }

    /// Check whether an instant falls within this period
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        dt >= self.start && dt < self.end
    }

    /// Duration of the period
    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Deterministic hash of the period bounds, used in series cache keys
    pub fn hash_hex(&self) -> String {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.start.to_rfc3339().as_bytes());
        hasher.update(b"|");
        hasher.update(self.end.to_rfc3339().as_bytes());
        format!("{:08x}", hasher.finalize())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_truncate_day() {
        let dt = utc(2024, 1, 15, 14, 35, 42);
        assert_eq!(Granularity::Day.truncate(dt), utc(2024, 1, 15, 0, 0, 0));
    }

    #[test]
    fn test_truncate_week_lands_on_monday() {
        // 2024-01-17 is a Wednesday; the week starts Monday 2024-01-15
        let dt = utc(2024, 1, 17, 9, 0, 0);
        assert_eq!(Granularity::Week.truncate(dt), utc(2024, 1, 15, 0, 0, 0));
    }

    #[test]
    fn test_truncate_month_and_year() {
        let dt = utc(2024, 7, 19, 3, 2, 1);
        assert_eq!(Granularity::Month.truncate(dt), utc(2024, 7, 1, 0, 0, 0));
        assert_eq!(Granularity::Year.truncate(dt), utc(2024, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_last_complete_day_is_yesterday() {
        let now = utc(2024, 1, 15, 14, 35, 0);
        let period = Granularity::Day.last_complete(now);
        assert_eq!(period.start, utc(2024, 1, 14, 0, 0, 0));
        assert_eq!(period.end, utc(2024, 1, 15, 0, 0, 0));
    }

    #[test]
    fn test_last_complete_month_across_year_boundary() {
        let now = utc(2024, 1, 10, 8, 0, 0);
        let period = Granularity::Month.last_complete(now);
        assert_eq!(period.start, utc(2023, 12, 1, 0, 0, 0));
        assert_eq!(period.end, utc(2024, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_previous_has_equal_length() {
        let period = Period {
            start: utc(2024, 1, 14, 0, 0, 0),
            end: utc(2024, 1, 15, 0, 0, 0),
        };
        let prev = period.previous();
        assert_eq!(prev.start, utc(2024, 1, 13, 0, 0, 0));
        assert_eq!(prev.end, period.start);
        assert_eq!(prev.length(), period.length());
    }

    #[test]
    fn test_contains_half_open() {
        let period = Period {
            start: utc(2024, 1, 14, 0, 0, 0),
            end: utc(2024, 1, 15, 0, 0, 0),
        };
        assert!(period.contains(utc(2024, 1, 14, 0, 0, 0)));
        assert!(period.contains(utc(2024, 1, 14, 23, 59, 59)));
        assert!(!period.contains(utc(2024, 1, 15, 0, 0, 0)));
    }

    #[test]
    fn test_try_new_rejects_inverted_bounds() {
        let start = utc(2024, 1, 15, 0, 0, 0);
        let end = utc(2024, 1, 14, 0, 0, 0);
        assert!(Period::try_new(start, end).is_none());
        assert!(Period::try_new(end, start).is_some());
    }

    #[test]
    fn test_hash_is_deterministic_and_distinct() {
        let a = Period {
            start: utc(2024, 1, 14, 0, 0, 0),
            end: utc(2024, 1, 15, 0, 0, 0),
        };
        let b = Period {
            start: utc(2024, 1, 15, 0, 0, 0),
            end: utc(2024, 1, 16, 0, 0, 0),
        };
        assert_eq!(a.hash_hex(), a.hash_hex());
        assert_ne!(a.hash_hex(), b.hash_hex());
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!(Granularity::parse("day"), Some(Granularity::Day));
        assert_eq!(Granularity::parse("MONTH"), Some(Granularity::Month));
        assert_eq!(Granularity::parse("fortnight"), None);
    }
}
