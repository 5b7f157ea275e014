//! Client classification.
//!
//! Known agents are matched against the curated [`BotRegistry`]; everything
//! else is scored by [`heuristics`]. [`capability`] infers behavior from
//! which resources a client fetched.

pub mod capability;
pub mod heuristics;
pub mod registry;

use tracing::error;

pub use capability::{CapabilityConfig, NoiseFilter};
pub use heuristics::{rank_candidates, score_unknown, Candidate, ScoringConfig};
pub use registry::{BotRegistry, RegistryError};

use crate::models::DateWindow;
use crate::repository::TrafficStore;

/// Rank unknown agents seen in `window` for registry curation.
///
/// Store failures and empty stores both yield an empty list.
pub async fn unknown_candidates(
    store: &dyn TrafficStore,
    registry: &BotRegistry,
    config: &ScoringConfig,
    window: &DateWindow,
    limit: usize,
) -> Vec<Candidate> {
    match store.agent_totals(window).await {
        Ok(totals) => rank_candidates(registry, config, &totals, limit),
        Err(e) => {
            error!("Agent totals query failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryTrafficStore;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn candidates_come_from_store_totals() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let store = MemoryTrafficStore::new();
        for _ in 0..60 {
            store
                .record_event(day, "192.0.2.1", "python-urllib/3.11", "/", 200)
                .await
                .unwrap();
        }
        store
            .record_event(day, "192.0.2.2", "Googlebot/2.1", "/", 200)
            .await
            .unwrap();

        let registry = BotRegistry::new(["Googlebot"]);
        let window = DateWindow::single(day);
        let ranked =
            unknown_candidates(&store, &registry, &ScoringConfig::default(), &window, 50).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].agent, "python-urllib/3.11");
        assert_eq!(ranked[0].hits, 60);
        // python keyword, non-browser prefix, high volume
        assert_eq!(ranked[0].score, 17);

        let empty = MemoryTrafficStore::new();
        assert!(
            unknown_candidates(&empty, &registry, &ScoringConfig::default(), &window, 50)
                .await
                .is_empty()
        );
    }
}
