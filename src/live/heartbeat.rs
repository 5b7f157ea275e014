//! Periodic spoken summary of session traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::narrator::NarratorHandle;
use super::{PipelineStats, StatsSnapshot};

fn plural(n: u64, one: &str, many: &str) -> String {
    if n == 1 {
        format!("1 {one}")
    } else {
        format!("{n} {many}")
    }
}

fn describe_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        plural(secs / 60, "minute", "minutes")
    } else {
        plural(secs, "second", "seconds")
    }
}

/// Text for one heartbeat, given the previous and current snapshots.
pub fn heartbeat_message(previous: &StatsSnapshot, current: &StatsSnapshot, interval: Duration) -> String {
    let recent = current.events.saturating_sub(previous.events);
    let mut message = format!(
        "{} in the last {}, {} this session.",
        plural(recent, "request", "requests"),
        describe_interval(interval),
        current.events
    );
    if current.store_errors > previous.store_errors {
        message.push_str(" Some requests could not be stored.");
    }
    message
}

/// Enqueue a summary every `interval`, independent of traffic volume.
pub fn spawn_heartbeat(
    interval: Duration,
    stats: Arc<PipelineStats>,
    narrator: NarratorHandle,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut previous = stats.snapshot();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let current = stats.snapshot();
            narrator.say(heartbeat_message(&previous, &current, interval));
            previous = current;
        }
    })
}
