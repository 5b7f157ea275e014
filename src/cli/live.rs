//! `watch` and `ingest` commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use console::style;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use honeybot::live::dashboard::{spawn_dashboard, spawn_panel_refresher, DashboardInputs, Panels};
use honeybot::live::director::{load_script, spawn_script_watcher, Director};
use honeybot::live::heartbeat::spawn_heartbeat;
use honeybot::live::narrator::{backend_for, spawn_narrator};
use honeybot::live::{
    spawn_store_sink, IngestWorker, LogSource, PipelineStats, StatsSnapshot, TailOptions, Tailer,
};

use super::AppContext;

pub(crate) struct WatchArgs {
    pub log: String,
    pub from_start: bool,
    pub dashboard: bool,
    pub narration: bool,
}

fn print_totals(lines: u64, stats: &StatsSnapshot, elapsed: Duration) {
    println!(
        "{} {} lines in {:.1}s: {} requests stored, {} unparsed, {} store errors",
        style("✓").green(),
        lines,
        elapsed.as_secs_f64(),
        stats.stored,
        stats.raw,
        stats.store_errors
    );
}

/// Run the live pipeline until the input ends or the operator quits.
pub(crate) async fn watch(ctx: &AppContext, args: WatchArgs) -> Result<()> {
    let live = &ctx.settings.live;
    let source = LogSource::from_arg(&args.log);
    let tailer = Tailer::new(
        source.clone(),
        TailOptions {
            from_start: args.from_start,
            follow: true,
            poll_interval: live.poll_interval(),
        },
    );
    tailer
        .check()
        .await
        .with_context(|| format!("Cannot open {}", source))?;

    let started = Instant::now();
    let (shutdown_tx, shutdown) = watch::channel(false);
    let stats = Arc::new(PipelineStats::new());
    let mut tasks = Vec::new();

    let (store_tx, store_rx) = mpsc::unbounded_channel();
    let store_sink = spawn_store_sink(ctx.store.clone(), store_rx, stats.clone());
    let mut worker = IngestWorker::new(stats.clone()).with_store(store_tx);

    let narrator = if args.narration {
        let (handle, task) = spawn_narrator(
            backend_for(live.speech_command.as_deref()),
            shutdown.clone(),
        );
        tasks.push(task);
        tasks.push(spawn_heartbeat(
            live.heartbeat_interval(),
            stats.clone(),
            handle.clone(),
            shutdown.clone(),
        ));
        Some(handle)
    } else {
        None
    };

    let director_state = match (&narrator, &live.show_script) {
        (Some(handle), Some(script)) => {
            let path = PathBuf::from(shellexpand::tilde(script).as_ref());
            let scenes = load_script(&path)?;
            let (generation_tx, generation) = watch::channel(0u64);
            tasks.push(spawn_script_watcher(
                path.clone(),
                Duration::from_secs(live.show_poll_secs.max(1)),
                generation_tx,
                shutdown.clone(),
            ));
            let director = Director::new(scenes, handle.clone(), generation)
                .with_script_path(path)
                .with_viewer(live.viewer_command.clone());
            let state = director.subscribe_state();
            tasks.push(tokio::spawn(director.run(shutdown.clone())));
            Some(state)
        }
        _ => None,
    };

    let dashboard = if args.dashboard {
        let (rows_tx, rows_rx) = mpsc::channel(live.dashboard_capacity.max(1));
        worker = worker.with_dashboard(rows_tx);
        let (panels_tx, panels_rx) = watch::channel(Panels::default());
        tasks.push(spawn_panel_refresher(
            ctx.store.clone(),
            ctx.settings.capability.clone(),
            live,
            panels_tx,
            shutdown.clone(),
        ));
        let inputs = DashboardInputs {
            rows: rows_rx,
            panels: panels_rx,
            director: director_state,
            stats: stats.clone(),
            shutdown: shutdown_tx.clone(),
        };
        Some(spawn_dashboard(live, ctx.registry.clone(), inputs).context("Failed to start dashboard")?)
    } else {
        worker = worker.with_event_log(true);
        None
    };

    let interrupt = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt.send(true);
        }
    });

    info!("Watching {}", source);
    let read = tailer
        .run(move |line| worker.handle_line(&line), shutdown.clone())
        .await;

    // Input ended or shutdown requested: stop everything else.
    let _ = shutdown_tx.send(true);
    store_sink.await.context("Store sink failed")?;
    for result in join_all(tasks).await {
        if let Err(e) = result {
            warn!("Live task failed: {}", e);
        }
    }
    drop(narrator);
    if let Some(handle) = dashboard {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Dashboard failed: {}", e),
            Err(_) => warn!("Dashboard thread panicked"),
        }
    }

    let lines = read.with_context(|| format!("Failed reading {}", source))?;
    print_totals(lines, &stats.snapshot(), started.elapsed());
    Ok(())
}

/// Import a whole log file and exit.
pub(crate) async fn ingest(ctx: &AppContext, log: PathBuf) -> Result<()> {
    let source = LogSource::File(log);
    let tailer = Tailer::new(
        source.clone(),
        TailOptions {
            from_start: true,
            follow: false,
            ..Default::default()
        },
    );
    tailer
        .check()
        .await
        .with_context(|| format!("Cannot open {}", source))?;

    let started = Instant::now();
    let stats = Arc::new(PipelineStats::new());
    let (store_tx, store_rx) = mpsc::unbounded_channel();
    let store_sink = spawn_store_sink(ctx.store.clone(), store_rx, stats.clone());
    let worker = IngestWorker::new(stats.clone()).with_store(store_tx);

    let (_shutdown_tx, shutdown) = watch::channel(false);
    let lines = tailer
        .run(move |line| worker.handle_line(&line), shutdown)
        .await
        .with_context(|| format!("Failed reading {}", source))?;
    store_sink.await.context("Store sink failed")?;

    print_totals(lines, &stats.snapshot(), started.elapsed());
    Ok(())
}
