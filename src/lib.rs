//! honeybot: live web-server log intelligence.
//!
//! Tails an access log, folds every request into a normalized daily
//! aggregate store, classifies clients, and drives a terminal dashboard
//! plus an audio narration channel from the same event stream.

pub mod anonymize;
pub mod classify;
pub mod config;
pub mod live;
pub mod models;
pub mod parser;
pub mod reports;
pub mod repository;
pub mod schema;

pub use models::{DateWindow, Dimension, LogEvent, ParsedLine, RankedCount};
pub use repository::{StoreError, StoreResult, TrafficStore};
