//! Capability evidence detectors.
//!
//! Infer what a client actually does from the secondary resources it
//! requests, not from what its agent string claims:
//! - hits on script-only resources mean the client executes JavaScript;
//! - hits on raw source documents mean it mines text rather than renders.
//!
//! Both views share a noise filter that drops ordinary browser signatures
//! and a deny-list of agents that carry no signal.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::models::{DateWindow, RankedCount};
use crate::repository::TrafficStore;

/// Path patterns (SQL `LIKE`) and noise rules for the detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Resources fetched only by a rendering engine running page scripts.
    pub js_paths: Vec<String>,
    /// Raw source documents (machine-readable article companions).
    pub content_paths: Vec<String>,
    /// Agents excluded regardless of shape (case-insensitive substrings).
    pub noise_agents: Vec<String>,
    /// Tokens present in genuine browser engine agent strings.
    pub engine_tokens: Vec<String>,
    /// Markers that make a browser-shaped agent worth keeping.
    pub automation_markers: Vec<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            js_paths: owned(&["%js_confirm.gif%", "%/mathjax/%"]),
            content_paths: owned(&["%.md", "%.md?%", "%/index.md%"]),
            noise_agents: owned(&["Dalvik/", "CFNetwork/", "okhttp/"]),
            engine_tokens: owned(&["AppleWebKit/", "Gecko/", "Chrome/", "Firefox/", "Safari/"]),
            automation_markers: owned(&["bot", "crawl", "spider", "http://", "https://"]),
        }
    }
}

/// Decides whether an agent is ordinary browser noise.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    noise_agents: Vec<String>,
    engine_tokens: Vec<String>,
    automation_markers: Vec<String>,
}

impl NoiseFilter {
    pub fn new(config: &CapabilityConfig) -> Self {
        let fold = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };
        Self {
            noise_agents: fold(&config.noise_agents),
            engine_tokens: fold(&config.engine_tokens),
            automation_markers: fold(&config.automation_markers),
        }
    }

    /// True for agents whose evidence should be ignored.
    pub fn is_noise(&self, agent: &str) -> bool {
        let agent = agent.trim();
        if agent.is_empty() || agent == "-" {
            return true;
        }
        let folded = agent.to_lowercase();
        if self.noise_agents.iter().any(|n| folded.contains(n)) {
            return true;
        }
        self.looks_like_browser(&folded)
    }

    fn looks_like_browser(&self, folded: &str) -> bool {
        folded.starts_with("mozilla/")
            && self.engine_tokens.iter().any(|t| folded.contains(t))
            && !self.automation_markers.iter().any(|m| folded.contains(m))
    }
}

/// Agents with evidence of executing JavaScript, most hits first.
pub async fn js_executors(
    store: &dyn TrafficStore,
    config: &CapabilityConfig,
    window: &DateWindow,
    limit: usize,
) -> Vec<RankedCount> {
    detect(store, config, &config.js_paths, window, limit).await
}

/// Agents with evidence of harvesting raw source documents, most hits first.
pub async fn content_miners(
    store: &dyn TrafficStore,
    config: &CapabilityConfig,
    window: &DateWindow,
    limit: usize,
) -> Vec<RankedCount> {
    detect(store, config, &config.content_paths, window, limit).await
}

async fn detect(
    store: &dyn TrafficStore,
    config: &CapabilityConfig,
    patterns: &[String],
    window: &DateWindow,
    limit: usize,
) -> Vec<RankedCount> {
    let rows = match store.agent_hits_on_paths(window, patterns).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Capability query failed: {}", e);
            return Vec::new();
        }
    };
    let filter = NoiseFilter::new(config);
    rows.into_iter()
        .filter(|row| !filter.is_noise(&row.label))
        .take(limit)
        .collect()
}
