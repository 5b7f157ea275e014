//! Heuristic scoring for agents the registry does not know.
//!
//! Scoring is an ordered list of named heuristics, each producing
//! `(points, reason)` findings. The score is the plain sum, so identical
//! input always produces an identical score and reason set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::registry::BotRegistry;
use crate::models::RankedCount;

/// Default number of candidates surfaced for registry curation.
pub const DEFAULT_TOP_N: usize = 50;

/// Heuristic weights and vocabularies. Empirically tuned; not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Terms implying automated fetch/crawl/script behavior.
    pub keywords: Vec<String>,
    /// Points per keyword found.
    pub keyword_points: i64,
    /// Token every mainstream browser agent starts with.
    pub browser_prefix: String,
    /// Points when the agent does not start with `browser_prefix`.
    pub non_browser_points: i64,
    /// Hits above which an agent is considered high volume.
    pub volume_threshold: i64,
    pub volume_points: i64,
    /// Tokens real browser engines put in their agent string.
    pub engine_tokens: Vec<String>,
    /// Points when an agent claims `compatible` but carries no engine token.
    pub compat_points: i64,
    /// Candidates scoring below this are not ranked.
    pub min_score: i64,
    pub top_n: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keywords: [
                "bot", "crawl", "spider", "fetch", "scrape", "search", "preview", "monitor",
                "http", "python", "curl", "wget", "headless", "puppeteer", "selenium",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            keyword_points: 10,
            browser_prefix: "Mozilla/".to_string(),
            non_browser_points: 5,
            volume_threshold: 50,
            volume_points: 2,
            engine_tokens: ["chrome", "safari", "firefox", "edg", "opera", "gecko/"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            compat_points: 5,
            min_score: 1,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// An unknown agent with its heuristic score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub agent: String,
    pub hits: i64,
    pub score: i64,
    pub reasons: BTreeSet<String>,
}

/// One scoring contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub points: i64,
    pub reason: String,
}

impl Finding {
    fn new(points: i64, reason: impl Into<String>) -> Self {
        Self {
            points,
            reason: reason.into(),
        }
    }
}

/// What a heuristic sees.
pub struct Sample<'a> {
    pub agent: &'a str,
    pub folded: String,
    pub hits: i64,
}

/// A named scoring rule.
pub struct Heuristic {
    pub name: &'static str,
    pub eval: fn(&ScoringConfig, &Sample<'_>) -> Vec<Finding>,
}

/// Evaluation order of the scoring rules.
pub const HEURISTICS: &[Heuristic] = &[
    Heuristic {
        name: "keywords",
        eval: suspicious_keywords,
    },
    Heuristic {
        name: "non-browser-prefix",
        eval: non_browser_prefix,
    },
    Heuristic {
        name: "high-volume",
        eval: high_volume,
    },
    Heuristic {
        name: "compatible-without-engine",
        eval: compatible_without_engine,
    },
];

fn suspicious_keywords(config: &ScoringConfig, sample: &Sample<'_>) -> Vec<Finding> {
    config
        .keywords
        .iter()
        .filter(|kw| !kw.is_empty() && sample.folded.contains(&kw.to_lowercase()))
        .map(|kw| Finding::new(config.keyword_points, format!("keyword:{kw}")))
        .collect()
}

fn non_browser_prefix(config: &ScoringConfig, sample: &Sample<'_>) -> Vec<Finding> {
    if sample.agent.starts_with(&config.browser_prefix) {
        Vec::new()
    } else {
        vec![Finding::new(config.non_browser_points, "non-browser-prefix")]
    }
}

fn high_volume(config: &ScoringConfig, sample: &Sample<'_>) -> Vec<Finding> {
    if sample.hits > config.volume_threshold {
        vec![Finding::new(config.volume_points, "high-volume")]
    } else {
        Vec::new()
    }
}

fn compatible_without_engine(config: &ScoringConfig, sample: &Sample<'_>) -> Vec<Finding> {
    let claims_compat = sample.folded.contains("mozilla") && sample.folded.contains("compatible");
    let has_engine = config
        .engine_tokens
        .iter()
        .any(|token| sample.folded.contains(&token.to_lowercase()));
    if claims_compat && !has_engine {
        vec![Finding::new(config.compat_points, "compatible-without-engine")]
    } else {
        Vec::new()
    }
}

/// Score one unknown agent. Callers must exclude registry matches first.
pub fn score_unknown(config: &ScoringConfig, agent: &str, hits: i64) -> Candidate {
    let sample = Sample {
        agent,
        folded: agent.to_lowercase(),
        hits,
    };
    let mut score = 0;
    let mut reasons = BTreeSet::new();
    for heuristic in HEURISTICS {
        for finding in (heuristic.eval)(config, &sample) {
            score += finding.points;
            reasons.insert(finding.reason);
        }
    }
    Candidate {
        agent: agent.to_string(),
        hits,
        score,
        reasons,
    }
}

/// Order by score desc, hits desc, then agent for a total order.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.hits.cmp(&a.hits))
            .then_with(|| a.agent.cmp(&b.agent))
    });
}

/// Score every agent absent from the registry and return the top `limit`.
pub fn rank_candidates(
    registry: &BotRegistry,
    config: &ScoringConfig,
    totals: &[RankedCount],
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = totals
        .iter()
        .filter(|row| !registry.is_known(&row.label))
        .map(|row| score_unknown(config, &row.label, row.count))
        .filter(|c| c.score >= config.min_score)
        .collect();
    sort_candidates(&mut candidates);
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0 Safari/537.36";

    fn reasons(c: &Candidate) -> Vec<&str> {
        c.reasons.iter().map(String::as_str).collect()
    }

    #[test]
    fn real_browser_scores_zero() {
        let c = score_unknown(&ScoringConfig::default(), CHROME, 10);
        assert_eq!(c.score, 0);
        assert!(c.reasons.is_empty());
    }

    #[test]
    fn keywords_prefix_and_volume_add_up() {
        let c = score_unknown(&ScoringConfig::default(), "python-requests/2.31 crawler", 51);
        // python, crawl = 2 keywords; no Mozilla prefix; > 50 hits
        assert_eq!(c.score, 10 + 10 + 5 + 2);
        assert_eq!(
            reasons(&c),
            vec!["high-volume", "keyword:crawl", "keyword:python", "non-browser-prefix"]
        );
    }

    #[test]
    fn volume_threshold_is_exclusive() {
        let config = ScoringConfig::default();
        assert_eq!(score_unknown(&config, "curl/8.0", 50).score, 15);
        assert_eq!(score_unknown(&config, "curl/8.0", 51).score, 17);
    }

    #[test]
    fn compatible_without_engine_is_flagged() {
        let c = score_unknown(
            &ScoringConfig::default(),
            "Mozilla/5.0 (compatible; Odd/1.0)",
            1,
        );
        assert_eq!(c.score, 5);
        assert_eq!(reasons(&c), vec!["compatible-without-engine"]);

        let spoof = score_unknown(
            &ScoringConfig::default(),
            "Mozilla/5.0 (compatible; MSIE 9.0) Chrome/99",
            1,
        );
        assert_eq!(spoof.score, 0);
    }

    #[test]
    fn weights_are_configurable() {
        let config = ScoringConfig {
            keyword_points: 1,
            non_browser_points: 0,
            ..Default::default()
        };
        assert_eq!(score_unknown(&config, "wget/1.21", 1).score, 1);
    }

    #[test]
    fn ranking_orders_by_score_then_hits_then_agent() {
        let totals = vec![
            RankedCount::new("curl/8.0", 3),
            RankedCount::new("wget/1.21", 3),
            RankedCount::new("ExampleBot/2.1 (+http://example.com/bot)", 2),
            RankedCount::new("curl/7.0", 9),
            RankedCount::new(CHROME, 10),
        ];
        let ranked = rank_candidates(&BotRegistry::default(), &ScoringConfig::default(), &totals, 50);
        let agents: Vec<_> = ranked.iter().map(|c| c.agent.as_str()).collect();
        assert_eq!(
            agents,
            vec![
                "ExampleBot/2.1 (+http://example.com/bot)",
                "curl/7.0",
                "curl/8.0",
                "wget/1.21",
            ]
        );
        let again = rank_candidates(&BotRegistry::default(), &ScoringConfig::default(), &totals, 50);
        assert_eq!(ranked, again);
    }

    #[test]
    fn known_agents_are_never_scored() {
        let totals = vec![
            RankedCount::new("Googlebot/2.1 crawl spider fetch", 500),
            RankedCount::new("curl/8.0", 1),
        ];
        let registry = BotRegistry::new(["googlebot"]);
        let ranked = rank_candidates(&registry, &ScoringConfig::default(), &totals, 50);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].agent, "curl/8.0");
    }

    #[test]
    fn ranking_respects_limit() {
        let totals: Vec<_> = (0..10)
            .map(|i| RankedCount::new(format!("bot-{i}"), i))
            .collect();
        let ranked = rank_candidates(&BotRegistry::default(), &ScoringConfig::default(), &totals, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].agent, "bot-9");
    }
}
