//! Indexer stderr capture.
//!
//! The indexer's stderr is drained for the whole session so the process
//! never blocks on a full pipe. Each line is kept in a bounded tail (attached
//! to fatal session errors), logged at debug level under the
//! `diffscope::indexer` target, and optionally appended to a log file.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

/// Bounded ring buffer of the most recent stderr lines.
#[derive(Debug)]
struct TailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

/// Shared handle to the captured tail.
#[derive(Debug, Clone)]
pub struct StderrTail {
    buffer: Arc<Mutex<TailBuffer>>,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(TailBuffer::new(capacity))),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.into());
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.buffer
            .lock()
            .map(|buf| buf.lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.lines.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A running drain task and the tail it fills.
#[derive(Debug)]
pub struct StderrCapture {
    tail: StderrTail,
    task: Option<JoinHandle<()>>,
}

impl StderrCapture {
    /// Start draining `stderr` in a background task.
    pub fn spawn<R>(stderr: R, capacity: usize, log_path: Option<PathBuf>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let tail = StderrTail::new(capacity);
        let task = tokio::spawn(drain(stderr, tail.clone(), log_path));
        Self {
            tail,
            task: Some(task),
        }
    }

    pub fn tail(&self) -> &StderrTail {
        &self.tail
    }

    /// Wait up to `grace` for the stream to reach EOF, then stop the task.
    pub async fn finish(mut self, grace: std::time::Duration) {
        if let Some(mut task) = self.task.take()
            && tokio::time::timeout(grace, &mut task).await.is_err()
        {
            task.abort();
        }
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drain<R>(stderr: R, tail: StderrTail, log_path: Option<PathBuf>)
where
    R: AsyncRead + Unpin,
{
    let mut log_file = match &log_path {
        Some(path) => match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open indexer log file");
                None
            }
        },
        None => None,
    };

    let mut reader = BufReader::new(stderr);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "indexer stderr closed");
                break;
            }
        }

        if let Some(file) = log_file.as_mut()
            && let Err(e) = file.write_all(&raw).await
        {
            tracing::warn!(error = %e, "indexer log write failed; disabling log file");
            log_file = None;
        }

        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\r', '\n']);
        tracing::debug!(target: "diffscope::indexer", "{line}");
        tail.push(line);
    }

    if let Some(mut file) = log_file {
        let _ = file.flush().await;
    }
}

/// Render a tail for inclusion in an error message.
pub(crate) fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nindexer stderr (most recent lines):");
    for line in lines {
        out.push_str("\n  ");
        out.push_str(line);
    }
    out
}
