//! Scripted show playback.
//!
//! The show file holds one scene per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! SAY Welcome to the honeybot stream.
//! VISIT https://example.com/ 20
//! WAIT 5
//! ```
//!
//! The director plays scenes in order and loops forever. Before every step
//! it compares the interrupt generation against the value it started the
//! cycle with; a change abandons the cycle, reloads the script and starts
//! over. Waiting and visiting are cut short by an interrupt; a visit's
//! viewer process is killed when the scene ends either way.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::narrator::NarratorHandle;

/// Pause between complete cycles.
const CYCLE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read show script {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Show script line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scene {
    Say(String),
    Visit { url: String, dwell: Duration },
    Wait(Duration),
}

fn parse_secs(value: &str, line: usize) -> Result<Duration, ScriptError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ScriptError::Parse {
            line,
            message: format!("expected whole seconds, got {:?}", value.trim()),
        })
}

/// Parse show script text into scenes.
pub fn parse_script(text: &str) -> Result<Vec<Scene>, ScriptError> {
    let mut scenes = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (keyword, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        let rest = rest.trim();
        let scene = match keyword.to_ascii_uppercase().as_str() {
            "SAY" if !rest.is_empty() => Scene::Say(rest.to_string()),
            "SAY" => {
                return Err(ScriptError::Parse {
                    line,
                    message: "SAY needs text".to_string(),
                })
            }
            "VISIT" => {
                let (url, secs) =
                    rest.rsplit_once(char::is_whitespace)
                        .ok_or_else(|| ScriptError::Parse {
                            line,
                            message: "VISIT needs a URL and seconds".to_string(),
                        })?;
                Scene::Visit {
                    url: url.trim().to_string(),
                    dwell: parse_secs(secs, line)?,
                }
            }
            "WAIT" => Scene::Wait(parse_secs(rest, line)?),
            other => {
                return Err(ScriptError::Parse {
                    line,
                    message: format!("unknown directive {other:?}"),
                })
            }
        };
        scenes.push(scene);
    }
    Ok(scenes)
}

pub fn load_script(path: &Path) -> Result<Vec<Scene>, ScriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_script(&text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorState {
    Idle,
    Narrating,
    Visiting,
    Waiting,
}

impl fmt::Display for DirectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectorState::Idle => "idle",
            DirectorState::Narrating => "narrating",
            DirectorState::Visiting => "visiting",
            DirectorState::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Interrupted,
    Shutdown,
}

/// Signal the director that new content arrived.
pub fn interrupt(generation: &watch::Sender<u64>) {
    generation.send_modify(|g| *g = g.wrapping_add(1));
}

pub struct Director {
    scenes: Vec<Scene>,
    script_path: Option<PathBuf>,
    narrator: NarratorHandle,
    viewer: Option<String>,
    generation: watch::Receiver<u64>,
    state: watch::Sender<DirectorState>,
}

impl Director {
    pub fn new(scenes: Vec<Scene>, narrator: NarratorHandle, generation: watch::Receiver<u64>) -> Self {
        let (state, _) = watch::channel(DirectorState::Idle);
        Self {
            scenes,
            script_path: None,
            narrator,
            viewer: None,
            generation,
            state,
        }
    }

    /// Reload scenes from `path` after every interrupt.
    pub fn with_script_path(mut self, path: PathBuf) -> Self {
        self.script_path = Some(path);
        self
    }

    /// Command used to display `VISIT` URLs.
    pub fn with_viewer(mut self, viewer: Option<String>) -> Self {
        self.viewer = viewer;
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DirectorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: DirectorState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        debug!("Director {}", state);
    }

    fn interrupted(&self, seen: u64) -> bool {
        *self.generation.borrow() != seen
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Director starting with {} scenes", self.scenes.len());
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(DirectorState::Idle);
            let seen = *self.generation.borrow_and_update();
            let outcome = if self.scenes.is_empty() {
                self.idle(&mut shutdown).await
            } else {
                self.run_cycle(seen, &mut shutdown).await
            };
            match outcome {
                Outcome::Completed => {}
                Outcome::Interrupted => {
                    info!("New content; restarting the show");
                    self.reload();
                }
                Outcome::Shutdown => break,
            }
        }
        self.set_state(DirectorState::Idle);
        debug!("Director stopped");
    }

    fn reload(&mut self) {
        let Some(path) = &self.script_path else {
            return;
        };
        match load_script(path) {
            Ok(scenes) => {
                info!("Loaded {} scenes from {}", scenes.len(), path.display());
                self.scenes = scenes;
            }
            Err(e) => warn!("{}; keeping the previous show", e),
        }
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let mut generation = self.generation.clone();
        tokio::select! {
            Ok(()) = generation.changed() => Outcome::Interrupted,
            _ = shutdown.changed() => Outcome::Shutdown,
        }
    }

    async fn run_cycle(&self, seen: u64, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        for scene in &self.scenes {
            if *shutdown.borrow() {
                return Outcome::Shutdown;
            }
            if self.interrupted(seen) {
                return Outcome::Interrupted;
            }
            let step = match scene {
                Scene::Say(text) => {
                    self.set_state(DirectorState::Narrating);
                    self.narrator.speak(text.as_str()).await;
                    Outcome::Completed
                }
                Scene::Visit { url, dwell } => {
                    self.set_state(DirectorState::Visiting);
                    self.visit(url, *dwell, shutdown).await
                }
                Scene::Wait(duration) => {
                    self.set_state(DirectorState::Waiting);
                    self.hold(*duration, shutdown).await
                }
            };
            if step != Outcome::Completed {
                return step;
            }
        }
        self.set_state(DirectorState::Waiting);
        match self.hold(CYCLE_PAUSE, shutdown).await {
            Outcome::Completed if self.interrupted(seen) => Outcome::Interrupted,
            outcome => outcome,
        }
    }

    /// Sleep unless interrupted or shut down first.
    async fn hold(&self, duration: Duration, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let mut generation = self.generation.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Outcome::Completed,
            Ok(()) = generation.changed() => Outcome::Interrupted,
            _ = shutdown.changed() => Outcome::Shutdown,
        }
    }

    async fn visit(&self, url: &str, dwell: Duration, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        info!("Visiting {} for {:?}", url, dwell);
        let viewer = self.viewer.as_deref().and_then(|cmd| spawn_viewer(cmd, url));
        let outcome = self.hold(dwell, shutdown).await;
        if let Some(mut child) = viewer {
            if let Err(e) = child.kill().await {
                debug!("Viewer for {} already gone: {}", url, e);
            }
        }
        outcome
    }
}

fn spawn_viewer(command: &str, url: &str) -> Option<Child> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    match Command::new(program)
        .args(parts)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => Some(child),
        Err(e) => {
            warn!("Failed to start viewer {}: {}", program, e);
            None
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Bump `generation` whenever the show file's modification time changes.
pub fn spawn_script_watcher(
    path: PathBuf,
    interval: Duration,
    generation: watch::Sender<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = modified(&path).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let current = modified(&path).await;
            if current != last {
                last = current;
                info!("{} changed", path.display());
                interrupt(&generation);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::narrator::spawn_narrator;
    use crate::live::narrator::testing::RecordingSpeech;
    use std::sync::Arc;
    use tokio::time::timeout;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn parses_scenes_and_skips_comments() {
        let script = "# intro\nSAY Hello there\n\nvisit https://example.com/a b 20\nWAIT 5\n";
        let scenes = parse_script(script).unwrap();
        assert_eq!(
            scenes,
            vec![
                Scene::Say("Hello there".to_string()),
                Scene::Visit {
                    url: "https://example.com/a b".to_string(),
                    dwell: Duration::from_secs(20),
                },
                Scene::Wait(Duration::from_secs(5)),
            ]
        );
    }

    #[test]
    fn reports_bad_lines_by_number() {
        let err = parse_script("SAY ok\nDANCE now\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse { line: 2, .. }));
        let err = parse_script("VISIT https://example.com/\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse { line: 1, .. }));
        let err = parse_script("WAIT soon\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse { line: 1, .. }));
        assert!(parse_script("SAY\n").is_err());
    }

    #[tokio::test]
    async fn interrupt_abandons_cycle_and_restarts() {
        let speech = Arc::new(RecordingSpeech::default());
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (narrator, narrator_task) = spawn_narrator(speech.clone(), shutdown.clone());
        let (generation_tx, generation) = watch::channel(0u64);

        let scenes = vec![
            Scene::Say("one".to_string()),
            Scene::Wait(Duration::from_secs(30)),
            Scene::Say("two".to_string()),
        ];
        let director = Director::new(scenes, narrator, generation);
        let state = director.subscribe_state();
        let task = tokio::spawn(director.run(shutdown.clone()));

        wait_until(|| *state.borrow() == DirectorState::Waiting).await;
        assert_eq!(speech.spoken(), vec!["one"]);

        interrupt(&generation_tx);
        wait_until(|| speech.spoken().len() >= 2).await;
        assert_eq!(speech.spoken(), vec!["one", "one"]);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        timeout(Duration::from_secs(5), narrator_task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn watcher_bumps_generation_on_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.txt");
        std::fs::write(&path, "SAY one\n").unwrap();

        let (generation_tx, mut generation) = watch::channel(0u64);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let task = spawn_script_watcher(
            path.clone(),
            Duration::from_millis(10),
            generation_tx,
            shutdown,
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();

        timeout(Duration::from_secs(5), generation.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*generation.borrow(), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
