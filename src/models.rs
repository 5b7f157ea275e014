//! Core domain types shared by the parser, store, classifiers and reports.

use chrono::{DateTime, Days, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// One parsed access-log request. Transient: never persisted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub address: String,
    pub agent: String,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: i32,
    pub bytes: u64,
    pub referrer: String,
    pub timestamp: DateTime<FixedOffset>,
}

impl LogEvent {
    /// Calendar day the request belongs to, in the log's own offset.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Result of parsing one input line. Every line yields exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A Combined Log Format request.
    Event(LogEvent),
    /// Sanitized text of a line that did not match the log format.
    Raw(String),
}

impl ParsedLine {
    pub fn is_event(&self) -> bool {
        matches!(self, ParsedLine::Event(_))
    }
}

/// The three normalized string dimensions of the aggregate store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Address,
    Agent,
    Path,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Address, Dimension::Agent, Dimension::Path];

    pub(crate) fn index(&self) -> usize {
        match self {
            Dimension::Address => 0,
            Dimension::Agent => 1,
            Dimension::Path => 2,
        }
    }
}

/// A stored dimension row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionValue {
    pub id: i32,
    pub value: String,
    pub first_seen: String,
}

/// Inclusive calendar-day lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The `days` most recent days ending at `today` (a value of 0 or 1 means today only).
    /// A span reaching past the earliest representable date starts there.
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let span = u64::from(days.max(1)) - 1;
        let start = today
            .checked_sub_days(Days::new(span))
            .unwrap_or(NaiveDate::MIN);
        Self::new(start, today)
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Bounds as stored `YYYY-MM-DD` text, which sorts chronologically.
    pub fn bounds(&self) -> (String, String) {
        (format_day(self.start), format_day(self.end))
    }
}

/// A `(label, count)` pair as produced by every ranked query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCount {
    pub label: String,
    pub count: i64,
}

impl RankedCount {
    pub fn new(label: impl Into<String>, count: i64) -> Self {
        Self {
            label: label.into(),
            count,
        }
    }
}

/// Sort by count descending, then label ascending.
pub fn sort_ranked(rows: &mut [RankedCount]) {
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
}

/// Whole-window traffic totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSummary {
    pub hits: i64,
    pub addresses: i64,
    pub agents: i64,
    pub paths: i64,
}

/// Day key format used by the `daily_logs` table.
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_last_days_is_inclusive() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let window = DateWindow::last_days(7, today);
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert!(window.contains(today));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()));
        assert_eq!(DateWindow::last_days(0, today), DateWindow::single(today));
    }

    #[test]
    fn window_last_days_saturates_at_earliest_date() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let window = DateWindow::last_days(u32::MAX, today);
        assert_eq!(window.start, NaiveDate::MIN);
        assert_eq!(window.end, today);
        assert!(window.contains(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()));
    }

    #[test]
    fn window_orders_reversed_bounds() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let window = DateWindow::new(a, b);
        assert_eq!(window.bounds(), ("2024-01-01".to_string(), "2024-01-05".to_string()));
    }

    #[test]
    fn ranked_sort_breaks_ties_by_label() {
        let mut rows = vec![
            RankedCount::new("b", 3),
            RankedCount::new("a", 3),
            RankedCount::new("c", 9),
        ];
        sort_ranked(&mut rows);
        let labels: Vec<_> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
    }
}
