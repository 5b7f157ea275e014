//! Ingest worker and store sink.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::PipelineStats;
use crate::anonymize::anonymize;
use crate::models::{LogEvent, ParsedLine};
use crate::parser::parse_line;
use crate::repository::{TrafficStore, TOTAL_HITS_KEY};

/// Parses raw lines and fans the results out to the attached sinks.
///
/// Never waits on a consumer: the store channel is unbounded and the
/// dashboard channel is fed with `try_send`.
pub struct IngestWorker {
    stats: Arc<PipelineStats>,
    store_tx: Option<mpsc::UnboundedSender<LogEvent>>,
    dashboard_tx: Option<mpsc::Sender<ParsedLine>>,
    log_events: bool,
}

impl IngestWorker {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        Self {
            stats,
            store_tx: None,
            dashboard_tx: None,
            log_events: false,
        }
    }

    pub fn with_store(mut self, tx: mpsc::UnboundedSender<LogEvent>) -> Self {
        self.store_tx = Some(tx);
        self
    }

    pub fn with_dashboard(mut self, tx: mpsc::Sender<ParsedLine>) -> Self {
        self.dashboard_tx = Some(tx);
        self
    }

    /// Log every event at info level (used when no dashboard is attached).
    pub fn with_event_log(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    pub fn handle_line(&self, line: &str) {
        let parsed = parse_line(line);
        self.stats.record_line(parsed.is_event());

        if let ParsedLine::Event(event) = &parsed {
            if self.log_events {
                info!(
                    "{} {} {} {} \"{}\"",
                    anonymize(&event.address, event.date()),
                    event.status,
                    event.method,
                    event.path,
                    event.agent
                );
            }
            if let Some(tx) = &self.store_tx {
                if tx.send(event.clone()).is_err() {
                    debug!("Store sink closed; event not persisted");
                }
            }
        }

        if let Some(tx) = &self.dashboard_tx {
            if tx.try_send(parsed).is_err() {
                self.stats.record_dashboard_drop();
            }
        }
    }
}

/// Persist events as they arrive. Each event bumps its daily aggregate and
/// the lifetime hit counter; failures are logged and the event is skipped.
pub fn spawn_store_sink(
    store: Arc<dyn TrafficStore>,
    mut rx: mpsc::UnboundedReceiver<LogEvent>,
    stats: Arc<PipelineStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let recorded = store
                .record_event(
                    event.date(),
                    &event.address,
                    &event.agent,
                    &event.path,
                    event.status,
                )
                .await;
            if let Err(e) = recorded {
                error!("Failed to record {} {}: {}", event.method, event.path, e);
                stats.record_store_error();
                continue;
            }
            stats.record_stored();
            if let Err(e) = store.increment_counter(TOTAL_HITS_KEY, 1).await {
                error!("Failed to bump {}: {}", TOTAL_HITS_KEY, e);
            }
        }
        debug!("Store sink drained");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DateWindow;
    use crate::repository::MemoryTrafficStore;
    use chrono::NaiveDate;

    const LINE: &str = r#"192.0.2.1 - - [01/Jun/2024:10:00:00 +0000] "GET /index.html HTTP/1.1" 200 512 "-" "curl/8.4.0""#;

    #[tokio::test]
    async fn events_reach_the_store_and_counter() {
        let store = Arc::new(MemoryTrafficStore::new());
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = spawn_store_sink(store.clone(), rx, stats.clone());

        let worker = IngestWorker::new(stats.clone()).with_store(tx);
        worker.handle_line(LINE);
        worker.handle_line(LINE);
        worker.handle_line("\x1b[2J not a request");
        drop(worker);
        sink.await.unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let count = store
            .aggregate_count(day, "192.0.2.1", "curl/8.4.0", "/index.html", 200)
            .await
            .unwrap();
        assert_eq!(count, Some(2));
        assert_eq!(store.counter(TOTAL_HITS_KEY).await.unwrap(), Some(2));
        let summary = store.summary(&DateWindow::single(day)).await.unwrap();
        assert_eq!(summary.hits, 2);

        let snap = stats.snapshot();
        assert_eq!(snap.lines, 3);
        assert_eq!(snap.raw, 1);
        assert_eq!(snap.stored, 2);
    }

    #[tokio::test]
    async fn full_dashboard_drops_rows_without_blocking() {
        let stats = Arc::new(PipelineStats::new());
        let (store_tx, mut store_rx) = mpsc::unbounded_channel();
        let (dash_tx, mut dash_rx) = mpsc::channel(1);
        let worker = IngestWorker::new(stats.clone())
            .with_store(store_tx)
            .with_dashboard(dash_tx);

        for _ in 0..5 {
            worker.handle_line(LINE);
        }

        assert_eq!(stats.snapshot().dashboard_dropped, 4);
        assert!(dash_rx.try_recv().unwrap().is_event());
        // The store sink never loses events.
        let mut stored = 0;
        while store_rx.try_recv().is_ok() {
            stored += 1;
        }
        assert_eq!(stored, 5);
    }
}
