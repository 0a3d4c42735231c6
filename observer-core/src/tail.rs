//! Log file tailing
//!
//! A [`LogTail`] owns at most one worker task. The worker reads the file from
//! a point just before its end, hands every complete line over a channel and
//! polls for more once it reaches the end. Polling instead of filesystem
//! notifications keeps it working when the writer truncates or rotates the
//! file underneath it.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ObserverError, Result};
use crate::log_line::LogLine;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKLOG_BYTES: u64 = 2048;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TailOptions {
    pub poll_interval: Duration,
    /// Bytes before the end of file to start reading from
    pub backlog_bytes: u64,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            backlog_bytes: DEFAULT_BACKLOG_BYTES,
        }
    }
}

/// Lines produced by an open tail, in file order.
///
/// Ends after the worker exits and every buffered line has been taken.
#[derive(Debug)]
pub struct TailStream {
    rx: mpsc::UnboundedReceiver<LogLine>,
}

impl TailStream {
    pub async fn next(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    /// Next line if one is already buffered
    pub fn try_next(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    /// Every line currently buffered
    pub fn drain(&mut self) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }
}

struct TailWorker {
    path: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct LogTail {
    options: TailOptions,
    unchanged_secs: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
    worker: Option<TailWorker>,
}

impl LogTail {
    pub fn new() -> Self {
        Self::with_options(TailOptions::default())
    }

    pub fn with_options(options: TailOptions) -> Self {
        Self {
            options,
            unchanged_secs: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// True while a worker is reading
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whole seconds since the last line arrived
    pub fn unchanged_secs(&self) -> u64 {
        self.unchanged_secs.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> Option<&Path> {
        self.worker.as_ref().map(|w| w.path.as_path())
    }

    /// Start tailing `path`.
    ///
    /// Returns `Ok(None)` without doing anything when the file does not exist
    /// yet or a tail is already running.
    pub fn open(&mut self, path: &Path) -> Result<Option<TailStream>> {
        if !path.exists() {
            debug!(path = %path.display(), "log file missing, not tailing");
            return Ok(None);
        }
        if self.is_active() {
            debug!(path = %path.display(), "already tailing");
            return Ok(None);
        }

        let mut file = open_shared(path).map_err(|e| ObserverError::file_access(path, e))?;
        let position = seek_backlog(&mut file, self.options.backlog_bytes)
            .map_err(|e| ObserverError::file_access(path, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.unchanged_secs.store(0, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);

        let reader = TailReader {
            path: path.to_path_buf(),
            reader: BufReader::new(File::from_std(file)),
            position,
            poll_interval: self.options.poll_interval,
            unchanged_secs: self.unchanged_secs.clone(),
            tx,
        };
        let active = self.active.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            reader.run(token).await;
            active.store(false, Ordering::SeqCst);
        });

        info!(path = %path.display(), position, "tailing log file");
        self.worker = Some(TailWorker {
            path: path.to_path_buf(),
            cancel,
            handle,
        });

        Ok(Some(TailStream { rx }))
    }

    /// Cancel the worker and wait until it has exited and closed the file
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            warn!(path = %worker.path.display(), "tail worker ended abnormally: {}", e);
        }
        self.active.store(false, Ordering::SeqCst);
        self.unchanged_secs.store(0, Ordering::SeqCst);
        info!(path = %worker.path.display(), "stopped tailing log file");
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }
}

/// Open for reading while other processes keep appending, renaming or deleting
fn open_shared(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.read(true);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        // FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE
        options.share_mode(0x1 | 0x2 | 0x4);
    }

    options.open(path)
}

/// Position `backlog` bytes before the end, or at the start of a shorter file
fn seek_backlog(file: &mut std::fs::File, backlog: u64) -> std::io::Result<u64> {
    let offset = i64::try_from(backlog).unwrap_or(i64::MAX);
    match file.seek(SeekFrom::End(-offset)) {
        Ok(pos) => Ok(pos),
        Err(_) => file.seek(SeekFrom::Start(0)),
    }
}

struct TailReader {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    poll_interval: Duration,
    unchanged_secs: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TailReader {
    async fn run(mut self, cancel: CancellationToken) {
        let mut pending: Vec<u8> = Vec::new();
        let mut stalled_since: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            loop {
                match self.reader.read_until(b'\n', &mut pending).await {
                    Ok(0) => break,
                    Ok(n) => {
                        self.position += n as u64;
                        if pending.last() != Some(&b'\n') {
                            // Writer is mid-line, wait for the rest
                            continue;
                        }

                        let text = decode_line(&pending);
                        pending.clear();

                        self.unchanged_secs.store(0, Ordering::SeqCst);
                        stalled_since = None;

                        if self.tx.send(LogLine::new(text)).is_err() {
                            debug!(path = %self.path.display(), "tail consumer gone");
                            return;
                        }
                        if cancel.is_cancelled() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(path = %self.path.display(), "failed to read log file: {}", e);
                        return;
                    }
                }
            }

            if self.file_was_replaced().await {
                pending.clear();
                if let Err(e) = self.reopen().await {
                    warn!(path = %self.path.display(), "failed to reopen log file: {}", e);
                    return;
                }
            }

            let since = stalled_since.get_or_insert_with(Instant::now);
            self.unchanged_secs
                .store(since.elapsed().as_secs(), Ordering::SeqCst);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// The path now holds a different or shorter file than the one we read: rotated or truncated.
    ///
    /// While the path is missing (between rename and re-create) the old handle is kept.
    async fn file_was_replaced(&self) -> bool {
        let Ok(current) = tokio::fs::metadata(&self.path).await else {
            return false;
        };
        if current.len() < self.position {
            return true;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            if let Ok(open) = self.reader.get_ref().metadata().await {
                return open.dev() != current.dev() || open.ino() != current.ino();
            }
        }

        false
    }

    async fn reopen(&mut self) -> std::io::Result<()> {
        let file = open_shared(&self.path)?;
        self.reader = BufReader::new(File::from_std(file));
        self.position = 0;
        info!(path = %self.path.display(), "log file rotated, reading from start");
        Ok(())
    }
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}
