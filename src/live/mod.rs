//! Live presentation pipeline.
//!
//! One ingest worker reads lines from a [`tail::Tailer`], parses them and
//! fans every event out to independent sinks:
//! - the store sink (unbounded channel, never loses an event);
//! - the dashboard (bounded channel, rows dropped and counted when full).
//!
//! Narration runs beside the data path: a heartbeat enqueues periodic
//! summaries and the [`director::Director`] plays a scripted show that
//! restarts whenever the show file changes.

pub mod dashboard;
pub mod director;
pub mod heartbeat;
pub mod narrator;
pub mod pipeline;
pub mod tail;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use director::{Director, DirectorState, Scene, ScriptError};
pub use narrator::{NarratorHandle, SpeechBackend, SpeechError};
pub use pipeline::{spawn_store_sink, IngestWorker};
pub use tail::{LogSource, TailOptions, Tailer};

/// Live pipeline settings (`[live]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Seconds between heartbeat narrations.
    pub heartbeat_secs: u64,
    /// Rows buffered between the ingest worker and the dashboard.
    pub dashboard_capacity: usize,
    /// Request rows kept on screen.
    pub dashboard_rows: usize,
    /// Dashboard redraw interval in milliseconds.
    pub tick_ms: u64,
    /// Seconds between capability panel refreshes.
    pub panel_refresh_secs: u64,
    /// Rows per capability panel.
    pub panel_limit: usize,
    /// Lookback for the capability panels, in days.
    pub panel_days: u32,
    /// Milliseconds between polls of a followed file at EOF.
    pub poll_ms: u64,
    /// Speech command resolved on `PATH`; the text is appended as the last argument.
    pub speech_command: Option<String>,
    /// Viewer command for `VISIT` scenes; the URL is appended as the last argument.
    pub viewer_command: Option<String>,
    /// Show script played by the director.
    pub show_script: Option<String>,
    /// Seconds between show script modification checks.
    pub show_poll_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 300,
            dashboard_capacity: 1024,
            dashboard_rows: 500,
            tick_ms: 250,
            panel_refresh_secs: 30,
            panel_limit: 10,
            panel_days: 1,
            poll_ms: 250,
            speech_command: Some("espeak".to_string()),
            viewer_command: None,
            show_script: None,
            show_poll_secs: 2,
        }
    }
}

impl LiveConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(10))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(10))
    }
}

/// Session counters shared by every pipeline stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    lines: AtomicU64,
    events: AtomicU64,
    raw: AtomicU64,
    stored: AtomicU64,
    store_errors: AtomicU64,
    dashboard_dropped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub events: u64,
    pub raw: u64,
    pub stored: u64,
    pub store_errors: u64,
    pub dashboard_dropped: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_line(&self, is_event: bool) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        if is_event {
            self.events.fetch_add(1, Ordering::Relaxed);
        } else {
            self.raw.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dashboard_drop(&self) {
        self.dashboard_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            raw: self.raw.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            dashboard_dropped: self.dashboard_dropped.load(Ordering::Relaxed),
        }
    }
}
