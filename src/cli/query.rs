//! `report`, `classify` and `counter` commands.

use anyhow::{Context as _, Result};
use chrono::Local;
use console::style;

use honeybot::classify;
use honeybot::models::{format_day, DateWindow};
use honeybot::reports::{Report, ReportContext, ReportKind};

use super::AppContext;

fn window_for(ctx: &AppContext, days: Option<u32>) -> DateWindow {
    DateWindow::last_days(
        days.unwrap_or(ctx.settings.report_days),
        Local::now().date_naive(),
    )
}

fn window_label(window: &DateWindow) -> String {
    if window.start == window.end {
        format_day(window.start)
    } else {
        format!("{} to {}", format_day(window.start), format_day(window.end))
    }
}

fn print_report(report: &Report) {
    println!(
        "{} {}",
        style(&report.title).bold(),
        style(format!("({})", window_label(&report.window))).dim()
    );
    print!("{}", report.render());
}

pub(crate) async fn report(
    ctx: &AppContext,
    kind: ReportKind,
    days: Option<u32>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let window = window_for(ctx, days);
    let limit = limit.unwrap_or(ctx.settings.reports.default_limit);
    let reports = ReportContext {
        store: ctx.store.as_ref(),
        registry: &ctx.registry,
        scoring: &ctx.settings.scoring,
        capability: &ctx.settings.capability,
        reports: &ctx.settings.reports,
    };
    let report = reports.generate(kind, &window, limit).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

pub(crate) async fn classify(
    ctx: &AppContext,
    days: Option<u32>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let window = window_for(ctx, days);
    let limit = limit.unwrap_or(ctx.settings.scoring.top_n);
    let candidates = classify::unknown_candidates(
        ctx.store.as_ref(),
        &ctx.registry,
        &ctx.settings.scoring,
        &window,
        limit,
    )
    .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    println!(
        "{} {}",
        style("Unregistered agents").bold(),
        style(format!(
            "({}, {} registry patterns)",
            window_label(&window),
            ctx.registry.len()
        ))
        .dim()
    );
    if candidates.is_empty() {
        println!("  (no candidates)");
        return Ok(());
    }
    println!("{:>5}  {:>7}  Agent", "Score", "Hits");
    for candidate in &candidates {
        let reasons: Vec<&str> = candidate.reasons.iter().map(String::as_str).collect();
        println!(
            "{:>5}  {:>7}  {}  {}",
            style(candidate.score).yellow(),
            candidate.hits,
            candidate.agent,
            style(reasons.join(", ")).dim()
        );
    }
    Ok(())
}

pub(crate) async fn counter(ctx: &AppContext, key: &str, add: Option<i64>) -> Result<()> {
    match add {
        Some(amount) => {
            let value = ctx
                .store
                .increment_counter(key, amount)
                .await
                .with_context(|| format!("Failed to update counter {}", key))?;
            println!("{} = {}", key, value);
        }
        None => {
            let value = ctx
                .store
                .counter(key)
                .await
                .with_context(|| format!("Failed to read counter {}", key))?;
            match value {
                Some(value) => println!("{} = {}", key, value),
                None => println!("{} is not set", style(key).dim()),
            }
        }
    }
    Ok(())
}
