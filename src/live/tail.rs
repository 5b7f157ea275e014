//! Line source for the ingest worker.
//!
//! Follows a growing log file the way `tail -F` does: starts at the end by
//! default, survives truncation and rotation, and only emits a line once
//! its terminating newline has arrived. `-` reads standard input until EOF.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info};

/// Where log lines come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    Stdin,
    File(PathBuf),
}

impl LogSource {
    /// `-` means standard input; anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            LogSource::Stdin
        } else {
            LogSource::File(PathBuf::from(arg))
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Stdin => write!(f, "<stdin>"),
            LogSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    /// Read existing file content instead of starting at the end.
    pub from_start: bool,
    /// Keep waiting for new data at EOF.
    pub follow: bool,
    pub poll_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            from_start: false,
            follow: true,
            poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct Tailer {
    source: LogSource,
    options: TailOptions,
}

/// Accumulates bytes until a full line is available.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
    emitted: u64,
}

impl LineBuffer {
    fn take_line(&mut self) -> String {
        let mut end = self.pending.len();
        if end > 0 && self.pending[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && self.pending[end - 1] == b'\r' {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.pending[..end]).into_owned();
        self.pending.clear();
        self.emitted += 1;
        line
    }

    fn is_complete(&self) -> bool {
        self.pending.last() == Some(&b'\n')
    }

    fn flush(&mut self, on_line: &mut impl FnMut(String)) {
        if !self.pending.is_empty() {
            on_line(self.take_line());
        }
    }
}

impl Tailer {
    pub fn new(source: LogSource, options: TailOptions) -> Self {
        Self { source, options }
    }

    /// Open the input up front so an unreadable file fails at startup.
    pub async fn check(&self) -> io::Result<()> {
        if let LogSource::File(path) = &self.source {
            File::open(path).await?;
        }
        Ok(())
    }

    /// Feed every complete line to `on_line` until EOF (when not following),
    /// stdin closes, or `shutdown` flips. Returns the number of lines emitted.
    pub async fn run<F>(self, mut on_line: F, mut shutdown: watch::Receiver<bool>) -> io::Result<u64>
    where
        F: FnMut(String),
    {
        let mut buffer = LineBuffer::default();
        match &self.source {
            LogSource::Stdin => {
                let reader = BufReader::new(tokio::io::stdin());
                read_to_eof(reader, &mut buffer, &mut on_line, &mut shutdown).await?;
            }
            LogSource::File(path) if !self.options.follow => {
                let mut file = File::open(path).await?;
                if !self.options.from_start {
                    file.seek(SeekFrom::End(0)).await?;
                }
                read_to_eof(BufReader::new(file), &mut buffer, &mut on_line, &mut shutdown).await?;
            }
            LogSource::File(path) => {
                self.follow(path, &mut buffer, &mut on_line, &mut shutdown)
                    .await?;
            }
        }
        debug!("Tailer for {} stopped after {} lines", self.source, buffer.emitted);
        Ok(buffer.emitted)
    }

    async fn follow<F>(
        &self,
        path: &Path,
        buffer: &mut LineBuffer,
        on_line: &mut F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> io::Result<()>
    where
        F: FnMut(String),
    {
        let file = File::open(path).await?;
        let mut identity = file_identity(&file.metadata().await?);
        let mut reader = BufReader::new(file);
        let mut position = if self.options.from_start {
            0
        } else {
            reader.seek(SeekFrom::End(0)).await?
        };
        info!("Following {} from byte {}", path.display(), position);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let read = reader.read_until(b'\n', &mut buffer.pending).await?;
            if read > 0 {
                position += read as u64;
                if buffer.is_complete() {
                    on_line(buffer.take_line());
                }
                continue;
            }

            if pause(self.options.poll_interval, shutdown).await {
                return Ok(());
            }

            let meta = match tokio::fs::metadata(path).await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("{} unavailable, waiting: {}", path.display(), e);
                    continue;
                }
            };
            if file_identity(&meta) != identity {
                info!("{} was rotated, reopening", path.display());
                if !buffer.pending.is_empty() {
                    debug!(
                        "Dropping {} unterminated bytes from the rotated file",
                        buffer.pending.len()
                    );
                    buffer.pending.clear();
                }
                let file = File::open(path).await?;
                identity = file_identity(&file.metadata().await?);
                reader = BufReader::new(file);
                position = 0;
            } else if meta.len() < position {
                info!("{} was truncated, rewinding", path.display());
                buffer.pending.clear();
                position = reader.seek(SeekFrom::Start(0)).await?;
            }
        }
    }
}

async fn read_to_eof<R, F>(
    mut reader: R,
    buffer: &mut LineBuffer,
    on_line: &mut F,
    shutdown: &mut watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String),
{
    loop {
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buffer.pending) => read?,
            _ = shutdown.changed() => return Ok(()),
        };
        if read == 0 {
            buffer.flush(on_line);
            return Ok(());
        }
        if buffer.is_complete() {
            on_line(buffer.take_line());
        }
    }
}

/// Sleep for `interval`; true if shutdown was requested meanwhile.
async fn pause(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn options(from_start: bool, follow: bool) -> TailOptions {
        TailOptions {
            from_start,
            follow,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("tailer channel closed")
    }

    #[tokio::test]
    async fn batch_read_emits_unterminated_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "first\r\nsecond\nthird").unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let mut lines = Vec::new();
        let count = Tailer::new(LogSource::File(path), options(true, false))
            .run(|line| lines.push(line), shutdown)
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn follow_buffers_partial_lines_and_survives_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "old line\n").unwrap();

        let (shutdown_tx, shutdown) = watch::channel(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tailer = Tailer::new(LogSource::File(path.clone()), options(false, true));
        let task = tokio::spawn(tailer.run(
            move |line| {
                let _ = tx.send(line);
            },
            shutdown,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        append(&path, "a\n");
        assert_eq!(next(&mut rx).await, "a");

        append(&path, "b");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        append(&path, "c\n");
        assert_eq!(next(&mut rx).await, "bc");

        std::fs::write(&path, "d\n").unwrap();
        assert_eq!(next(&mut rx).await, "d");

        shutdown_tx.send(true).unwrap();
        let emitted = timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert_eq!(emitted, 3);
    }

    #[tokio::test]
    async fn rotation_discards_unterminated_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "").unwrap();

        let (shutdown_tx, shutdown) = watch::channel(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tailer = Tailer::new(LogSource::File(path.clone()), options(false, true));
        let task = tokio::spawn(tailer.run(
            move |line| {
                let _ = tx.send(line);
            },
            shutdown,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        append(&path, r#"192.0.2.1 - - [01/Jun/2024:12:00:00 +0000] "GET / HTTP/1.1" 200 5120 "-" "Mozil"#);
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        std::fs::write(&path, "fresh\n").unwrap();

        assert_eq!(next(&mut rx).await, "fresh");
        shutdown_tx.send(true).unwrap();
        let emitted = timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
        assert_eq!(emitted, 1);
    }

    #[test]
    fn dash_means_stdin() {
        assert_eq!(LogSource::from_arg("-"), LogSource::Stdin);
        assert_eq!(
            LogSource::from_arg("/var/log/nginx/access.log"),
            LogSource::File(PathBuf::from("/var/log/nginx/access.log"))
        );
    }
}
