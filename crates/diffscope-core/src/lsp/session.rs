//! One language-server session over a pair of byte streams.
//!
//! A dedicated reader task owns the server's output. It classifies every
//! frame and routes it: responses go to the waiter registered for their id,
//! `window/workDoneProgress/create` is acknowledged on the spot,
//! diagnostics and file status are recorded, and background-index progress
//! feeds the [`IndexProgressTracker`]. [`Session::request`] therefore only
//! ever sees the response carrying its own id, and nothing the server says
//! in between is dropped.
//!
//! Any framing violation, end of stream, write failure, or timeout is fatal:
//! the session moves to [`SessionState::Terminated`], every pending request
//! fails with the same cause, and so does every later call.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use diffscope_config::AppConfig;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::codec::{FrameError, FrameReader, write_frame};
use super::message::{self, Incoming, RequestId, ResponseError};
use super::progress::{
    IndexProgress, IndexProgressTracker, IndexingOutcome, WaitOptions, wait_for_convergence,
};
use super::types::{self, Location, Position, SymbolNode};
use crate::build_info;
use crate::indexer::{IndexerCommand, IndexerError};
use crate::stderr::{StderrCapture, StderrTail, format_tail};

const WORK_DONE_PROGRESS_CREATE: &str = "window/workDoneProgress/create";

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a [`Session`]. There are no transitions out of `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Terminated,
}

/// Why a session terminated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalCause {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("reading from the indexer failed: {0}")]
    Read(String),

    #[error("the indexer closed its output stream")]
    Closed,

    #[error("writing to the indexer failed: {0}")]
    Write(String),

    #[error("no response to {method} within {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("the session was shut down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session is unusable. Carries the indexer's most recent stderr.
    #[error("indexer session failed: {cause}{}", format_tail(.stderr_tail))]
    Fatal {
        cause: FatalCause,
        stderr_tail: Vec<String>,
    },

    /// The server answered with a JSON-RPC error. The session stays usable.
    #[error("{method} failed: {error}")]
    Rpc { method: String, error: ResponseError },

    /// The server answered with a result of the wrong shape.
    #[error("{method} returned an unexpected result: {reason}")]
    UnexpectedResult { method: String, reason: String },

    #[error(transparent)]
    Spawn(#[from] IndexerError),
}

impl SessionError {
    /// Whether the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Spawn(_))
    }
}

/// Knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Codebase root, sent as `rootUri`. Should be absolute.
    pub root: PathBuf,
    /// `languageId` used in `didOpen`.
    pub language_id: String,
    pub request_timeout: Duration,
    pub initialize_timeout: Duration,
    pub shutdown_grace: Duration,
    pub stderr_tail_lines: usize,
    pub stderr_log: Option<PathBuf>,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig, root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            language_id: config.context.language_id.clone(),
            request_timeout: config.session.request_timeout(),
            initialize_timeout: config.session.initialize_timeout(),
            shutdown_grace: config.session.shutdown_grace(),
            stderr_tail_lines: config.session.stderr_tail_lines,
            stderr_log: config.session.stderr_log.clone(),
        }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self::from_config(&AppConfig::default(), &root)
    }
}

enum Reply {
    Result(Value),
    Error(ResponseError),
    Fatal(FatalCause),
}

/// State guarded together so a waiter can never be registered after the
/// pending map was drained by a failure.
struct Core {
    state: SessionState,
    fatal: Option<FatalCause>,
    pending: HashMap<RequestId, oneshot::Sender<Reply>>,
}

/// State shared between the session handle and its reader task.
struct Shared {
    core: Mutex<Core>,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    diagnostics: Mutex<HashMap<String, Vec<Value>>>,
    file_status: Mutex<HashMap<String, String>>,
    /// Signalled on new diagnostics and on termination.
    changed: Notify,
    stderr_tail: Option<StderrTail>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(writer: BoxWriter, stderr_tail: Option<StderrTail>) -> Self {
        Self {
            core: Mutex::new(Core {
                state: SessionState::Uninitialized,
                fatal: None,
                pending: HashMap::new(),
            }),
            writer: tokio::sync::Mutex::new(Some(writer)),
            diagnostics: Mutex::new(HashMap::new()),
            file_status: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            stderr_tail,
        }
    }

    fn state(&self) -> SessionState {
        lock(&self.core).state
    }

    /// Advance the state unless the session already terminated.
    fn advance(&self, next: SessionState) {
        let mut core = lock(&self.core);
        if core.state != SessionState::Terminated {
            core.state = next;
        }
    }

    fn check_alive(&self) -> Result<(), FatalCause> {
        match &lock(&self.core).fatal {
            Some(cause) => Err(cause.clone()),
            None => Ok(()),
        }
    }

    fn register(&self, id: RequestId) -> Result<oneshot::Receiver<Reply>, FatalCause> {
        let mut core = lock(&self.core);
        if let Some(cause) = &core.fatal {
            return Err(cause.clone());
        }
        let (tx, rx) = oneshot::channel();
        core.pending.insert(id, tx);
        Ok(rx)
    }

    fn take_waiter(&self, id: &RequestId) -> Option<oneshot::Sender<Reply>> {
        lock(&self.core).pending.remove(id)
    }

    /// Terminate with `cause` unless already terminated. Returns the cause
    /// that is in effect afterwards.
    fn fail(&self, cause: FatalCause) -> FatalCause {
        let effective = {
            let mut core = lock(&self.core);
            if let Some(existing) = &core.fatal {
                existing.clone()
            } else {
                core.state = SessionState::Terminated;
                core.fatal = Some(cause.clone());
                let pending = core.pending.len();
                for (_, waiter) in core.pending.drain() {
                    let _ = waiter.send(Reply::Fatal(cause.clone()));
                }
                if cause != FatalCause::Shutdown {
                    tracing::warn!(%cause, pending, "indexer session terminated");
                }
                cause
            }
        };
        self.changed.notify_waiters();
        effective
    }

    fn error(&self, cause: FatalCause) -> SessionError {
        SessionError::Fatal {
            cause,
            stderr_tail: self
                .stderr_tail
                .as_ref()
                .map(StderrTail::lines)
                .unwrap_or_default(),
        }
    }

    async fn send(&self, value: &Value) -> Result<(), FatalCause> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(self.fail(FatalCause::Shutdown));
        };
        if let Err(e) = write_frame(w, value).await {
            return Err(self.fail(FatalCause::Write(e.to_string())));
        }
        Ok(())
    }

    fn on_notification(&self, method: &str, params: Value, tracker: &IndexProgressTracker) {
        match method {
            "$/progress" => {
                if !tracker.observe(&params) {
                    tracing::trace!(token = ?params.get("token"), "progress for another token");
                }
            }
            "textDocument/publishDiagnostics" => {
                let Some(uri) = params.get("uri").and_then(Value::as_str) else {
                    tracing::debug!("diagnostics without uri");
                    return;
                };
                let diagnostics = params
                    .get("diagnostics")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                tracing::debug!(uri, count = diagnostics.len(), "diagnostics published");
                lock(&self.diagnostics).insert(uri.to_string(), diagnostics);
                self.changed.notify_waiters();
            }
            m if m.starts_with("textDocument/") && m.ends_with(".fileStatus") => {
                let uri = params.get("uri").and_then(Value::as_str);
                let state = params.get("state").and_then(Value::as_str);
                if let (Some(uri), Some(state)) = (uri, state) {
                    tracing::debug!(uri, state, "file status");
                    lock(&self.file_status).insert(uri.to_string(), state.to_string());
                }
            }
            other => tracing::trace!(method = other, "notification ignored"),
        }
    }

    async fn dispatch(
        &self,
        message: Incoming,
        tracker: &IndexProgressTracker,
    ) -> Result<(), FatalCause> {
        match message {
            Incoming::Response { id, result } => {
                let reply = match result {
                    Ok(value) => Reply::Result(value),
                    Err(error) => Reply::Error(error),
                };
                match self.take_waiter(&id) {
                    // The receiver is gone if its request already timed out.
                    Some(waiter) => {
                        let _ = waiter.send(reply);
                    }
                    None => tracing::debug!(%id, "response with no waiting request"),
                }
            }
            Incoming::Request { id, method, .. } if method == WORK_DONE_PROGRESS_CREATE => {
                tracing::trace!(%id, "acknowledging workDoneProgress/create");
                self.send(&message::response(&RequestId::Number(0), Value::Null))
                    .await?;
            }
            Incoming::Request { id, method, .. } => {
                tracing::debug!(%id, %method, "server request ignored");
            }
            Incoming::Notification { method, params } => {
                self.on_notification(&method, params, tracker);
            }
        }
        Ok(())
    }
}

async fn read_loop<R>(mut frames: FrameReader<R>, shared: Arc<Shared>, tracker: IndexProgressTracker)
where
    R: AsyncRead + Unpin,
{
    let cause = loop {
        let value = match frames.read_frame().await {
            Ok(Some(value)) => value,
            Ok(None) => break FatalCause::Closed,
            Err(FrameError::Io(e)) => break FatalCause::Read(e.to_string()),
            Err(e) => break FatalCause::Protocol(e.to_string()),
        };
        let message = match Incoming::classify(value) {
            Ok(message) => message,
            Err(e) => break FatalCause::Protocol(e.to_string()),
        };
        if let Err(cause) = shared.dispatch(message, &tracker).await {
            break cause;
        }
    };
    shared.fail(cause);
}

/// A live connection to one indexer process.
///
/// Owned by exactly one extraction pass and never reused. Call
/// [`Session::shutdown`] when done; dropping the session aborts the reader
/// task and kills a spawned process without the grace period.
pub struct Session {
    shared: Arc<Shared>,
    options: SessionOptions,
    next_id: AtomicI64,
    opened: Mutex<HashSet<String>>,
    progress: watch::Receiver<IndexProgress>,
    reader: Option<JoinHandle<()>>,
    child: Option<Child>,
    stderr: Option<StderrCapture>,
    shut_down: bool,
}

impl Session {
    /// Connect over arbitrary byte streams and run the handshake.
    pub async fn connect<R, W>(reader: R, writer: W, options: SessionOptions) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(reader, writer, None, None, options).await
    }

    /// Launch the indexer process and connect to its stdio.
    pub async fn spawn(command: &IndexerCommand, options: SessionOptions) -> Result<Self, SessionError> {
        let process = command.spawn()?;
        let stderr = StderrCapture::spawn(
            process.stderr,
            options.stderr_tail_lines,
            options.stderr_log.clone(),
        );
        Self::start(
            process.stdout,
            process.stdin,
            Some(process.child),
            Some(stderr),
            options,
        )
        .await
    }

    async fn start<R, W>(
        reader: R,
        writer: W,
        child: Option<Child>,
        stderr: Option<StderrCapture>,
        options: SessionOptions,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tracker, progress) = IndexProgressTracker::new();
        let tail = stderr.as_ref().map(|capture| capture.tail().clone());
        let shared = Arc::new(Shared::new(Box::new(writer), tail));
        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(reader),
            Arc::clone(&shared),
            tracker,
        ));

        let mut session = Self {
            shared,
            options,
            next_id: AtomicI64::new(1),
            opened: Mutex::new(HashSet::new()),
            progress,
            reader: Some(reader_task),
            child,
            stderr,
            shut_down: false,
        };

        if let Err(e) = session.handshake().await {
            session.shutdown().await;
            // The stderr drain has finished now; report the full tail.
            return Err(match e {
                SessionError::Fatal { cause, .. } => session.shared.error(cause),
                other => other,
            });
        }
        Ok(session)
    }

    async fn handshake(&self) -> Result<(), SessionError> {
        self.shared.advance(SessionState::Initializing);

        let root_uri = types::path_to_uri(&self.options.root).map_or(Value::Null, Value::String);
        let params = json!({
            "processId": std::process::id(),
            "clientInfo": {
                "name": build_info::CLIENT_NAME,
                "version": build_info::version_string(),
            },
            "rootUri": root_uri,
            "capabilities": {
                "window": { "workDoneProgress": true },
                "textDocument": {
                    "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
                    "publishDiagnostics": {},
                },
            },
            "initializationOptions": {
                "clangdFileStatus": true,
                "fallbackFlags": [],
            },
        });

        let result = self
            .call("initialize", params, self.options.initialize_timeout)
            .await?;
        let (server_name, server_version) = server_identity(&result);
        tracing::info!(
            server = server_name,
            version = server_version,
            "indexer initialized"
        );

        self.notify("initialized", json!({})).await?;
        self.shared.advance(SessionState::Ready);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Send a request and wait for the response with the same id.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, SessionError> {
        self.call(method, params, self.options.request_timeout).await
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request_id = RequestId::Number(id);
        let waiter = self
            .shared
            .register(request_id.clone())
            .map_err(|cause| self.shared.error(cause))?;

        tracing::debug!(id, method, "request");
        self.shared
            .send(&message::request(id, method, params))
            .await
            .map_err(|cause| self.shared.error(cause))?;

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(Reply::Result(value))) => {
                tracing::trace!(id, method, "response");
                Ok(value)
            }
            Ok(Ok(Reply::Error(error))) => {
                tracing::debug!(id, method, %error, "error response");
                Err(SessionError::Rpc {
                    method: method.to_string(),
                    error,
                })
            }
            Ok(Ok(Reply::Fatal(cause))) => Err(self.shared.error(cause)),
            Ok(Err(_)) => Err(self.shared.error(self.shared.fail(FatalCause::Closed))),
            Err(_) => {
                self.shared.take_waiter(&request_id);
                let cause = self.shared.fail(FatalCause::Timeout {
                    method: method.to_string(),
                    timeout,
                });
                Err(self.shared.error(cause))
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), SessionError> {
        self.shared
            .check_alive()
            .map_err(|cause| self.shared.error(cause))?;
        tracing::debug!(method, "notify");
        self.shared
            .send(&message::notification(method, params))
            .await
            .map_err(|cause| self.shared.error(cause))
    }

    /// Send `textDocument/didOpen` unless `uri` was already opened in this
    /// session. Returns whether a notification was sent.
    pub async fn open_document(&self, uri: &str, text: &str) -> Result<bool, SessionError> {
        if !lock(&self.opened).insert(uri.to_string()) {
            return Ok(false);
        }
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": self.options.language_id,
                    "version": 1,
                    "text": text,
                }
            }),
        )
        .await?;
        Ok(true)
    }

    pub async fn definition(&self, uri: &str, position: Position) -> Result<Vec<Location>, SessionError> {
        const METHOD: &str = "textDocument/definition";
        let result = self
            .request(
                METHOD,
                json!({
                    "textDocument": { "uri": uri },
                    "position": position,
                }),
            )
            .await?;
        types::definition_locations(result).map_err(|e| SessionError::UnexpectedResult {
            method: METHOD.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn document_symbols(&self, uri: &str) -> Result<Vec<SymbolNode>, SessionError> {
        const METHOD: &str = "textDocument/documentSymbol";
        let result = self
            .request(METHOD, json!({ "textDocument": { "uri": uri } }))
            .await?;
        types::symbol_tree(result).map_err(|e| SessionError::UnexpectedResult {
            method: METHOD.to_string(),
            reason: e.to_string(),
        })
    }

    /// Latest background-index snapshot.
    pub fn progress(&self) -> IndexProgress {
        *self.progress.borrow()
    }

    /// Wait for the background index to converge within `options`.
    ///
    /// Stalling or running out of time is reported in the outcome and
    /// logged, never returned as an error. Errors only if the session is or
    /// becomes unusable.
    pub async fn wait_for_indexing(&self, options: &WaitOptions) -> Result<IndexingOutcome, SessionError> {
        self.shared
            .check_alive()
            .map_err(|cause| self.shared.error(cause))?;
        let mut progress = self.progress.clone();
        match wait_for_convergence(&mut progress, options).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                let cause = self.shared.fail(FatalCause::Closed);
                Err(self.shared.error(cause))
            }
        }
    }

    /// Latest diagnostics published for `uri`.
    pub fn diagnostics(&self, uri: &str) -> Option<Vec<Value>> {
        lock(&self.shared.diagnostics).get(uri).cloned()
    }

    /// Latest `fileStatus` state reported for `uri`.
    pub fn file_status(&self, uri: &str) -> Option<String> {
        lock(&self.shared.file_status).get(uri).cloned()
    }

    /// Wait until diagnostics for `uri` have been published, up to `timeout`.
    pub async fn wait_for_diagnostics(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<Value>>, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let changed = self.shared.changed.notified();
            if let Some(diagnostics) = self.diagnostics(uri) {
                return Ok(Some(diagnostics));
            }
            self.shared
                .check_alive()
                .map_err(|cause| self.shared.error(cause))?;
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Captured indexer stderr, oldest first. Empty for sessions created
    /// with [`Session::connect`].
    pub fn stderr_tail(&self) -> Vec<String> {
        self.shared
            .stderr_tail
            .as_ref()
            .map(StderrTail::lines)
            .unwrap_or_default()
    }

    /// Terminate the session: fail outstanding requests, stop the reader,
    /// close the indexer's stdin, and kill the process if it has not exited
    /// within the grace period. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.shared.fail(FatalCause::Shutdown);

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let grace = self.options.shutdown_grace;
        // Dropping stdin is what tells the indexer to exit.
        drop(self.shared.writer.lock().await.take());

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(%status, "indexer exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "waiting for indexer failed"),
                Err(_) => {
                    tracing::warn!(?grace, "indexer did not exit in time; killing it");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill indexer");
                    }
                }
            }
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.finish(grace).await;
        }
        tracing::debug!("indexer session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Server name and version from an `initialize` result.
fn server_identity(result: &Value) -> (&str, &str) {
    let info = result.get("serverInfo");
    let name = info
        .and_then(|i| i.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let version = info
        .and_then(|i| i.get("version"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    (name, version)
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("root", &self.options.root)
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}
