//! Read-only Top-N views over the aggregate store.
//!
//! Every report takes an inclusive date window and a row limit and produces
//! ordered `(label, count)` rows. Store errors are logged and yield an empty
//! report; they never reach the caller.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::classify::capability::{self, CapabilityConfig};
use crate::classify::{self, BotRegistry, ScoringConfig};
use crate::models::{DateWindow, RankedCount};
use crate::repository::{StoreResult, TrafficStore};

/// Default rows per report.
pub const DEFAULT_LIMIT: usize = 20;

/// Report filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Case-insensitive substrings marking generic vulnerability-scanner paths.
    pub probe_patterns: Vec<String>,
    pub default_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            probe_patterns: [
                "wp-", ".php", ".env", ".git", "xmlrpc", "cgi-bin", "phpmyadmin", "/admin",
                ".aws", "actuator", "/vendor/", ".sql", "/owa/", "boaform", "/.well-known/acme",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl ReportConfig {
    /// True when `path` looks like a vulnerability probe rather than missing content.
    pub fn is_probe(&self, path: &str) -> bool {
        let folded = path.to_lowercase();
        self.probe_patterns
            .iter()
            .any(|p| !p.is_empty() && folded.contains(&p.to_lowercase()))
    }
}

/// The available views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportKind {
    /// Top agents by total volume.
    Agents,
    /// 404s on real content paths: redirect-map candidates.
    Missing,
    /// 404s on scanner paths: access-denial candidates.
    Probes,
    /// High-volume agents absent from the bot registry.
    NewBots,
    /// Agents with JavaScript-execution evidence.
    Js,
    /// Agents fetching raw source documents.
    Markdown,
    /// Window totals.
    Summary,
}

/// A titled, ordered list of `(label, count)` rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub title: String,
    pub label_header: String,
    pub window: DateWindow,
    pub rows: Vec<RankedCount>,
}

impl Report {
    fn new(title: &str, label_header: &str, window: &DateWindow, rows: Vec<RankedCount>) -> Self {
        Self {
            title: title.to_string(),
            label_header: label_header.to_string(),
            window: *window,
            rows,
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.label.as_str()).collect()
    }

    /// Plain-text table, counts right-aligned.
    pub fn render(&self) -> String {
        let count_width = self
            .rows
            .iter()
            .map(|r| r.count.to_string().len())
            .max()
            .unwrap_or(0)
            .max("Hits".len());

        let mut out = String::new();
        let _ = writeln!(out, "{:>count_width$}  {}", "Hits", self.label_header);
        let _ = writeln!(out, "{}  {}", "-".repeat(count_width), "-".repeat(self.label_header.len().max(8)));
        if self.rows.is_empty() {
            let _ = writeln!(out, "{:>count_width$}  (no data)", "");
        }
        for row in &self.rows {
            let _ = writeln!(out, "{:>count_width$}  {}", row.count, row.label);
        }
        out
    }
}

/// Everything a report needs besides the window and limit.
pub struct ReportContext<'a> {
    pub store: &'a dyn TrafficStore,
    pub registry: &'a BotRegistry,
    pub scoring: &'a ScoringConfig,
    pub capability: &'a CapabilityConfig,
    pub reports: &'a ReportConfig,
}

impl ReportContext<'_> {
    pub async fn generate(&self, kind: ReportKind, window: &DateWindow, limit: usize) -> Report {
        match kind {
            ReportKind::Agents => top_agents(self.store, window, limit).await,
            ReportKind::Missing => true_404s(self.store, self.reports, window, limit).await,
            ReportKind::Probes => probe_paths(self.store, self.reports, window, limit).await,
            ReportKind::NewBots => {
                new_agents(self.store, self.registry, self.scoring, window, limit).await
            }
            ReportKind::Js => {
                let rows = capability::js_executors(self.store, self.capability, window, limit).await;
                Report::new("JavaScript executors", "Agent", window, rows)
            }
            ReportKind::Markdown => {
                let rows =
                    capability::content_miners(self.store, self.capability, window, limit).await;
                Report::new("Source-document readers", "Agent", window, rows)
            }
            ReportKind::Summary => summary(self.store, window).await,
        }
    }
}

fn or_empty(result: StoreResult<Vec<RankedCount>>, what: &str) -> Vec<RankedCount> {
    result.unwrap_or_else(|e| {
        error!("{} report query failed: {}", what, e);
        Vec::new()
    })
}

/// Top agents by total hits.
pub async fn top_agents(store: &dyn TrafficStore, window: &DateWindow, limit: usize) -> Report {
    let mut rows = or_empty(store.agent_totals(window).await, "Agent");
    rows.truncate(limit);
    Report::new("Top agents", "Agent", window, rows)
}

/// 404 paths that are not scanner probes.
pub async fn true_404s(
    store: &dyn TrafficStore,
    config: &ReportConfig,
    window: &DateWindow,
    limit: usize,
) -> Report {
    let rows = or_empty(store.path_totals_for_status(window, 404).await, "Missing");
    let rows = rows
        .into_iter()
        .filter(|r| !config.is_probe(&r.label))
        .take(limit)
        .collect();
    Report::new("Missing content (404)", "Path", window, rows)
}

/// 404 paths matching the scanner-probe patterns.
pub async fn probe_paths(
    store: &dyn TrafficStore,
    config: &ReportConfig,
    window: &DateWindow,
    limit: usize,
) -> Report {
    let rows = or_empty(store.path_totals_for_status(window, 404).await, "Probe");
    let rows = rows
        .into_iter()
        .filter(|r| config.is_probe(&r.label))
        .take(limit)
        .collect();
    Report::new("Vulnerability probes (404)", "Path", window, rows)
}

/// Unknown agents ranked by heuristic score, reported with their hits.
pub async fn new_agents(
    store: &dyn TrafficStore,
    registry: &BotRegistry,
    scoring: &ScoringConfig,
    window: &DateWindow,
    limit: usize,
) -> Report {
    let rows = classify::unknown_candidates(store, registry, scoring, window, limit)
        .await
        .into_iter()
        .map(|c| RankedCount::new(c.agent, c.hits))
        .collect();
    Report::new("Unregistered bot candidates", "Agent", window, rows)
}

/// Window totals as a report.
pub async fn summary(store: &dyn TrafficStore, window: &DateWindow) -> Report {
    let rows = match store.summary(window).await {
        Ok(s) => vec![
            RankedCount::new("requests", s.hits),
            RankedCount::new("clients", s.addresses),
            RankedCount::new("agents", s.agents),
            RankedCount::new("paths", s.paths),
        ],
        Err(e) => {
            error!("Summary query failed: {}", e);
            Vec::new()
        }
    };
    Report::new("Traffic summary", "Measure", window, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryTrafficStore;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn probe_matching_is_case_insensitive() {
        let config = ReportConfig::default();
        assert!(config.is_probe("/WP-LOGIN.PHP"));
        assert!(config.is_probe("/.env"));
        assert!(!config.is_probe("/old-article/"));
    }

    #[tokio::test]
    async fn top_agents_truncates() {
        let store = MemoryTrafficStore::new();
        for (agent, n) in [("A", 3), ("B", 1), ("C", 2)] {
            for _ in 0..n {
                store.record_event(day(), "192.0.2.1", agent, "/", 200).await.unwrap();
            }
        }
        let report = top_agents(&store, &DateWindow::single(day()), 2).await;
        assert_eq!(report.labels(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn summary_reports_window_totals() {
        let store = MemoryTrafficStore::new();
        store.record_event(day(), "192.0.2.1", "A", "/", 200).await.unwrap();
        store.record_event(day(), "192.0.2.2", "A", "/x", 200).await.unwrap();
        let report = summary(&store, &DateWindow::single(day())).await;
        assert_eq!(report.rows[0], RankedCount::new("requests", 2));
        assert_eq!(report.rows[1], RankedCount::new("clients", 2));
        assert_eq!(report.rows[2], RankedCount::new("agents", 1));
    }

    #[test]
    fn render_aligns_counts() {
        let report = Report::new(
            "Top agents",
            "Agent",
            &DateWindow::single(day()),
            vec![RankedCount::new("curl/8.0", 12345), RankedCount::new("wget", 7)],
        );
        let text = report.render();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], " Hits  Agent");
        assert_eq!(lines[2], "12345  curl/8.0");
        assert_eq!(lines[3], "    7  wget");

        let empty = Report::new("Top agents", "Agent", &DateWindow::single(day()), vec![]);
        assert!(empty.render().contains("(no data)"));
    }
}
