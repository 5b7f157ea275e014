//! Terminal dashboard.
//!
//! Runs on its own OS thread. Incoming rows land in a fixed-size ring
//! buffer, so per-event work is constant; the capability panels are filled
//! by a separate reader task that queries the store on an interval and
//! publishes results through a watch channel.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle as ThreadHandle;
use std::time::Duration;

use chrono::Local;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::{DefaultTerminal, Frame};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::director::DirectorState;
use super::{LiveConfig, PipelineStats, StatsSnapshot};
use crate::anonymize::anonymize;
use crate::classify::capability::{content_miners, js_executors, CapabilityConfig};
use crate::classify::BotRegistry;
use crate::models::{DateWindow, ParsedLine, RankedCount};
use crate::repository::{TrafficStore, TOTAL_HITS_KEY};

/// Rows drained from the channel per frame.
const MAX_DRAIN: usize = 512;

/// Consecutive terminal failures tolerated before the dashboard gives up.
const MAX_TERMINAL_FAILURES: u32 = 20;

/// Counts consecutive terminal I/O failures. Each failure is logged as it
/// happens; only an unbroken run of `limit` failures is fatal.
struct TerminalFaults {
    consecutive: u32,
    limit: u32,
}

impl TerminalFaults {
    fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    /// `Ok(Some)` on success, `Ok(None)` for a tolerated failure.
    fn check<T>(&mut self, what: &str, result: io::Result<T>) -> io::Result<Option<T>> {
        match result {
            Ok(value) => {
                self.consecutive = 0;
                Ok(Some(value))
            }
            Err(e) => {
                self.consecutive += 1;
                if self.consecutive >= self.limit {
                    error!(
                        "Dashboard {} failed {} times in a row, giving up: {}",
                        what, self.consecutive, e
                    );
                    return Err(e);
                }
                warn!("Dashboard {} failed: {}", what, e);
                Ok(None)
            }
        }
    }
}

/// One request as shown on screen. The client is already anonymized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRow {
    pub client: String,
    pub status: i32,
    pub method: String,
    pub path: String,
    pub agent: String,
    /// Registry pattern that matched the agent, if any.
    pub bot: Option<String>,
}

/// Results published by the panel reader task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Panels {
    pub js: Vec<RankedCount>,
    pub content: Vec<RankedCount>,
    pub total_hits: Option<i64>,
}

pub struct DashboardState {
    registry: Arc<BotRegistry>,
    rows: VecDeque<RequestRow>,
    capacity: usize,
    session_hits: u64,
    raw_lines: u64,
    panels: Panels,
}

impl DashboardState {
    pub fn new(registry: Arc<BotRegistry>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            registry,
            rows: VecDeque::with_capacity(capacity),
            capacity,
            session_hits: 0,
            raw_lines: 0,
            panels: Panels::default(),
        }
    }

    pub fn push(&mut self, line: ParsedLine) {
        let event = match line {
            ParsedLine::Event(event) => event,
            ParsedLine::Raw(_) => {
                self.raw_lines += 1;
                return;
            }
        };
        self.session_hits += 1;
        if self.rows.len() == self.capacity {
            self.rows.pop_back();
        }
        let bot = self.registry.matching(&event.agent).map(str::to_string);
        self.rows.push_front(RequestRow {
            client: anonymize(&event.address, event.date()),
            status: event.status,
            method: event.method,
            path: event.path,
            agent: event.agent,
            bot,
        });
    }

    /// Newest first.
    pub fn rows(&self) -> impl Iterator<Item = &RequestRow> {
        self.rows.iter()
    }

    pub fn set_panels(&mut self, panels: Panels) {
        self.panels = panels;
    }
}

fn status_style(status: i32) -> Style {
    match status {
        200..=299 => Style::default().fg(Color::Green),
        300..=399 => Style::default().fg(Color::Cyan),
        400..=499 => Style::default().fg(Color::Yellow),
        500..=599 => Style::default().fg(Color::Red),
        _ => Style::default(),
    }
}

fn header(state: &DashboardState, stats: &StatsSnapshot, director: Option<DirectorState>) -> Paragraph<'static> {
    let total = state
        .panels
        .total_hits
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut spans = vec![
        Span::styled("honeybot", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("  session {}", state.session_hits)),
        Span::raw(format!("  total {total}")),
        Span::raw(format!("  parsed {} / raw {}", stats.events, stats.raw)),
        Span::raw(format!("  dropped {}", stats.dashboard_dropped)),
    ];
    if stats.store_errors > 0 {
        spans.push(Span::styled(
            format!("  store errors {}", stats.store_errors),
            Style::default().fg(Color::Red),
        ));
    }
    if let Some(director) = director {
        spans.push(Span::raw(format!("  show {director}")));
    }
    Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL))
}

fn request_table(state: &DashboardState, height: u16) -> Table<'_> {
    let visible = usize::from(height.saturating_sub(3));
    let rows = state.rows().take(visible).map(|row| {
        let style = if row.bot.is_some() {
            Style::default().fg(Color::Magenta)
        } else {
            Style::default()
        };
        Row::new(vec![
            Cell::from(row.client.as_str()),
            Cell::from(row.status.to_string()).style(status_style(row.status)),
            Cell::from(row.method.as_str()),
            Cell::from(row.path.as_str()),
            Cell::from(row.agent.as_str()),
        ])
        .style(style)
    });
    Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(4),
            Constraint::Length(7),
            Constraint::Percentage(35),
            Constraint::Fill(1),
        ],
    )
    .header(
        Row::new(vec!["Client", "Code", "Method", "Path", "Agent"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Requests"))
}

fn ranked_table<'a>(title: &'a str, rows: &'a [RankedCount]) -> Table<'a> {
    let rows = rows.iter().map(|r| {
        Row::new(vec![
            Cell::from(r.count.to_string()),
            Cell::from(r.label.as_str()),
        ])
    });
    Table::new(rows, [Constraint::Length(7), Constraint::Fill(1)])
        .block(Block::default().borders(Borders::ALL).title(title))
}

/// Render one frame.
pub fn draw(frame: &mut Frame, state: &DashboardState, stats: &StatsSnapshot, director: Option<DirectorState>) {
    let outer = Layout::vertical([Constraint::Length(3), Constraint::Min(5)]).split(frame.area());
    frame.render_widget(header(state, stats, director), outer[0]);

    let body = Layout::horizontal([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(outer[1]);
    let requests: Rect = body[0];
    frame.render_widget(request_table(state, requests.height), requests);

    let side = Layout::vertical([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(body[1]);
    frame.render_widget(ranked_table("JavaScript executors", &state.panels.js), side[0]);
    frame.render_widget(ranked_table("Source readers", &state.panels.content), side[1]);
}

/// Inputs the dashboard thread consumes.
pub struct DashboardInputs {
    pub rows: mpsc::Receiver<ParsedLine>,
    pub panels: watch::Receiver<Panels>,
    pub director: Option<watch::Receiver<DirectorState>>,
    pub stats: Arc<PipelineStats>,
    /// Flipped to `true` when the operator quits.
    pub shutdown: watch::Sender<bool>,
}

/// Start the dashboard thread. It owns the terminal until it returns.
pub fn spawn_dashboard(
    config: &LiveConfig,
    registry: Arc<BotRegistry>,
    inputs: DashboardInputs,
) -> io::Result<ThreadHandle<io::Result<()>>> {
    let tick = config.tick();
    let capacity = config.dashboard_rows;
    std::thread::Builder::new()
        .name("dashboard".to_string())
        .spawn(move || {
            let mut terminal = ratatui::try_init()?;
            let state = DashboardState::new(registry, capacity);
            let result = event_loop(&mut terminal, state, inputs, tick);
            ratatui::restore();
            result
        })
}

fn event_loop(
    terminal: &mut DefaultTerminal,
    mut state: DashboardState,
    mut inputs: DashboardInputs,
    tick: Duration,
) -> io::Result<()> {
    let mut shutdown = inputs.shutdown.subscribe();
    let mut faults = TerminalFaults::new(MAX_TERMINAL_FAILURES);
    loop {
        for _ in 0..MAX_DRAIN {
            match inputs.rows.try_recv() {
                Ok(line) => state.push(line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if inputs.panels.has_changed().unwrap_or(false) {
            state.set_panels(inputs.panels.borrow_and_update().clone());
        }
        let director = inputs.director.as_ref().map(|d| *d.borrow());
        let snapshot = inputs.stats.snapshot();
        let drawn = terminal.draw(|frame| draw(frame, &state, &snapshot, director));
        faults.check("render", drawn.map(|_| ()))?;

        match faults.check("input poll", event::poll(tick))? {
            Some(true) => {
                if let Some(Event::Key(key)) = faults.check("input read", event::read())? {
                    if key.kind == KeyEventKind::Press
                        && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                    {
                        debug!("Dashboard quit requested");
                        let _ = inputs.shutdown.send(true);
                        return Ok(());
                    }
                }
            }
            Some(false) => {}
            None => std::thread::sleep(tick),
        }
        if *shutdown.borrow_and_update() {
            return Ok(());
        }
    }
}

/// Refresh the capability panels and the persisted hit total on an interval.
pub fn spawn_panel_refresher(
    store: Arc<dyn TrafficStore>,
    capability: CapabilityConfig,
    config: &LiveConfig,
    panels: watch::Sender<Panels>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.panel_refresh_secs.max(1));
    let limit = config.panel_limit;
    let days = config.panel_days;
    tokio::spawn(async move {
        loop {
            let window = DateWindow::last_days(days, Local::now().date_naive());
            let js = js_executors(store.as_ref(), &capability, &window, limit).await;
            let content = content_miners(store.as_ref(), &capability, &window, limit).await;
            let total_hits = store.counter(TOTAL_HITS_KEY).await.unwrap_or_else(|e| {
                warn!("Failed to read {}: {}", TOTAL_HITS_KEY, e);
                None
            });
            panels.send_replace(Panels {
                js,
                content,
                total_hits,
            });
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
    })
}
