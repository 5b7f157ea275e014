//! Serialized speech output.
//!
//! Any number of producers enqueue utterances through a [`NarratorHandle`];
//! a single consumer plays them in arrival order, one at a time, so speech
//! never overlaps. Enqueueing never blocks.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    Failed { command: String, status: String },
}

/// Blocking text-to-speech output. Returns once the utterance has finished playing.
pub trait SpeechBackend: Send + Sync {
    fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

/// Speech through an external program, with the text as its last argument.
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSpeech {
    /// Resolve `command` (program plus optional arguments) on `PATH`.
    pub fn resolve(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = which::which(parts.next()?).ok()?;
        Some(Self {
            program,
            args: parts.map(str::to_string).collect(),
        })
    }
}

impl SpeechBackend for CommandSpeech {
    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let command = self.program.display().to_string();
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .status()
            .map_err(|source| SpeechError::Spawn {
                command: command.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Failed {
                command,
                status: status.to_string(),
            })
        }
    }
}

/// Logs utterances instead of speaking them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeech;

impl SpeechBackend for SilentSpeech {
    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        info!("Narration: {}", text);
        Ok(())
    }
}

/// Pick the configured speech command if it resolves, else stay silent.
pub fn backend_for(command: Option<&str>) -> Arc<dyn SpeechBackend> {
    match command.map(|c| (c, CommandSpeech::resolve(c))) {
        Some((_, Some(speech))) => {
            info!("Narrating through {}", speech.program.display());
            Arc::new(speech)
        }
        Some((c, None)) => {
            warn!("Speech command {:?} not found on PATH; narration is silent", c);
            Arc::new(SilentSpeech)
        }
        None => Arc::new(SilentSpeech),
    }
}

struct Utterance {
    text: String,
    done: Option<oneshot::Sender<()>>,
}

/// Producer side of the narration queue.
#[derive(Clone)]
pub struct NarratorHandle {
    tx: mpsc::UnboundedSender<Utterance>,
}

impl NarratorHandle {
    /// Enqueue `text` and return immediately.
    pub fn say(&self, text: impl Into<String>) {
        let utterance = Utterance {
            text: text.into(),
            done: None,
        };
        if self.tx.send(utterance).is_err() {
            debug!("Narrator stopped; utterance discarded");
        }
    }

    /// Enqueue `text` and wait until it has been played (or dropped).
    pub async fn speak(&self, text: impl Into<String>) {
        let (done, finished) = oneshot::channel();
        let utterance = Utterance {
            text: text.into(),
            done: Some(done),
        };
        if self.tx.send(utterance).is_ok() {
            let _ = finished.await;
        }
    }
}

/// Start the single playback consumer. It stops on shutdown or once every
/// handle has been dropped and the queue is drained.
pub fn spawn_narrator(
    backend: Arc<dyn SpeechBackend>,
    mut shutdown: watch::Receiver<bool>,
) -> (NarratorHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Utterance>();
    let task = tokio::spawn(async move {
        loop {
            let utterance = tokio::select! {
                next = rx.recv() => match next {
                    Some(u) => u,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };
            let backend = backend.clone();
            let text = utterance.text;
            let played = tokio::task::spawn_blocking(move || backend.speak(&text)).await;
            match played {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Dropped utterance: {}", e),
                Err(e) => warn!("Speech task failed: {}", e),
            }
            if let Some(done) = utterance.done {
                let _ = done.send(());
            }
        }
        debug!("Narrator stopped");
    });
    (NarratorHandle { tx }, task)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records what was spoken and whether two utterances ever overlapped.
    #[derive(Default)]
    pub struct RecordingSpeech {
        pub spoken: Mutex<Vec<String>>,
        pub overlapped: AtomicBool,
        busy: AtomicBool,
    }

    impl RecordingSpeech {
        pub fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }
    }

    impl SpeechBackend for RecordingSpeech {
        fn speak(&self, text: &str) -> Result<(), SpeechError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(20));
            self.spoken.lock().unwrap().push(text.to_string());
            self.busy.store(false, Ordering::SeqCst);
            if text == "fail" {
                return Err(SpeechError::Failed {
                    command: "test".to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(())
        }
    }
}
