//! A scripted language server for session and extraction tests.
//!
//! [`FakeIndexer`] speaks framed JSON-RPC over an in-memory
//! `tokio::io::duplex` pipe. It answers `initialize`, remembers the text of
//! every `didOpen`ed document, resolves `textDocument/definition` by the
//! word under the requested position, and serves `documentSymbol` trees
//! registered per URI. Extra frames can be injected before a definition
//! reply to exercise interleaving.
//!
//! # Example
//!
//! ```ignore
//! let fake = FakeIndexer::new()
//!     .definition("foo", location(&uri, 40, 44))
//!     .document_symbols(&uri, json!([symbol("foo", 40, 44, vec![])]));
//! let (reader, writer, handle) = fake.start();
//! let session = Session::connect(reader, writer, options).await?;
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use diffscope_core::lsp::FrameReader;
use diffscope_core::lsp::codec::write_frame;
use diffscope_core::lsp::message::{notification, request};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// Raw bytes written as-is in place of a reply.
const GARBAGE_FRAME: &[u8] = b"Content-Length: nope\r\n\r\n";

/// Scripted behaviour, consumed by [`FakeIndexer::start`].
#[derive(Default)]
pub struct FakeIndexer {
    definitions: HashMap<String, Value>,
    definition_errors: HashSet<String>,
    symbols: HashMap<String, Value>,
    before_definition: VecDeque<Value>,
    after_initialized: Vec<Value>,
    garbage_on: Option<String>,
    silent_on: Option<String>,
    close_on: Option<String>,
}

/// Observes a running [`FakeIndexer`].
#[derive(Clone)]
pub struct FakeIndexerHandle {
    received: Arc<Mutex<Vec<Value>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// `Location` JSON spanning whole lines `start..=end`.
pub fn location(uri: &str, start: u32, end: u32) -> Value {
    json!({
        "uri": uri,
        "range": {
            "start": { "line": start, "character": 0 },
            "end": { "line": end, "character": 0 },
        }
    })
}

/// Hierarchical `DocumentSymbol` JSON spanning lines `start..=end`.
pub fn symbol(name: &str, start: u32, end: u32, children: Vec<Value>) -> Value {
    let range = json!({
        "start": { "line": start, "character": 0 },
        "end": { "line": end, "character": 1 },
    });
    json!({
        "name": name,
        "kind": 12,
        "range": range,
        "selectionRange": range,
        "children": children,
    })
}

/// `$/progress` params for the background index.
pub fn index_progress(kind: &str, percentage: Option<u32>) -> Value {
    let mut value = json!({ "kind": kind });
    if let Some(p) = percentage {
        value["percentage"] = json!(p);
    }
    notification(
        "$/progress",
        json!({ "token": "backgroundIndexProgress", "value": value }),
    )
}

impl FakeIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer definition requests on `word` with `result`.
    pub fn definition(mut self, word: &str, result: Value) -> Self {
        self.definitions.insert(word.to_string(), result);
        self
    }

    /// Answer definition requests on `word` with a JSON-RPC error.
    pub fn definition_error(mut self, word: &str) -> Self {
        self.definition_errors.insert(word.to_string());
        self
    }

    /// Answer `documentSymbol` for `uri` with `result`.
    pub fn document_symbols(mut self, uri: &str, result: Value) -> Self {
        self.symbols.insert(uri.to_string(), result);
        self
    }

    /// Send `frame` before the next definition reply. Frames are sent in
    /// order, all before the first definition reply.
    pub fn before_definition(mut self, frame: Value) -> Self {
        self.before_definition.push_back(frame);
        self
    }

    /// Send `frame` once the client reports `initialized`.
    pub fn after_initialized(mut self, frame: Value) -> Self {
        self.after_initialized.push(frame);
        self
    }

    /// Reply to `method` with an unparseable frame.
    pub fn garbage_on(mut self, method: &str) -> Self {
        self.garbage_on = Some(method.to_string());
        self
    }

    /// Never reply to `method`.
    pub fn silent_on(mut self, method: &str) -> Self {
        self.silent_on = Some(method.to_string());
        self
    }

    /// Hang up when `method` arrives, as if the server process died.
    pub fn close_on(mut self, method: &str) -> Self {
        self.close_on = Some(method.to_string());
        self
    }

    /// Run the server and return the client's ends of the pipe.
    pub fn start(
        self,
    ) -> (
        ReadHalf<DuplexStream>,
        WriteHalf<DuplexStream>,
        FakeIndexerHandle,
    ) {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client);
        let received = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(self.serve(server, Arc::clone(&received)));
        let handle = FakeIndexerHandle {
            received,
            task: Arc::new(Mutex::new(Some(task))),
        };
        (client_read, client_write, handle)
    }

    async fn serve(mut self, stream: DuplexStream, received: Arc<Mutex<Vec<Value>>>) {
        let (read, mut write) = tokio::io::split(stream);
        let mut frames = FrameReader::new(read);
        let mut documents: HashMap<String, String> = HashMap::new();

        while let Ok(Some(message)) = frames.read_frame().await {
            received
                .lock()
                .expect("fake indexer log poisoned")
                .push(message.clone());

            let Some(method) = message.get("method").and_then(Value::as_str) else {
                continue;
            };
            let id = message.get("id").cloned();
            let params = message.get("params").cloned().unwrap_or(Value::Null);

            if self.close_on.as_deref() == Some(method) {
                return;
            }
            if self.silent_on.as_deref() == Some(method) {
                continue;
            }
            if self.garbage_on.as_deref() == Some(method) {
                use tokio::io::AsyncWriteExt;
                let _ = write.write_all(GARBAGE_FRAME).await;
                let _ = write.flush().await;
                continue;
            }

            let reply = match method {
                "initialize" => Some(Ok(json!({
                    "capabilities": { "definitionProvider": true, "documentSymbolProvider": true },
                    "serverInfo": { "name": "fake-indexer", "version": "0" },
                }))),
                "initialized" => {
                    for frame in std::mem::take(&mut self.after_initialized) {
                        if write_frame(&mut write, &frame).await.is_err() {
                            return;
                        }
                    }
                    None
                }
                "textDocument/didOpen" => {
                    let doc = &params["textDocument"];
                    if let (Some(uri), Some(text)) = (doc["uri"].as_str(), doc["text"].as_str()) {
                        documents.insert(uri.to_string(), text.to_string());
                    }
                    None
                }
                "textDocument/definition" => {
                    while let Some(frame) = self.before_definition.pop_front() {
                        if write_frame(&mut write, &frame).await.is_err() {
                            return;
                        }
                    }
                    let word = params["textDocument"]["uri"]
                        .as_str()
                        .and_then(|uri| documents.get(uri))
                        .and_then(|text| {
                            word_at(
                                text,
                                params["position"]["line"].as_u64().unwrap_or(0),
                                params["position"]["character"].as_u64().unwrap_or(0),
                            )
                        });
                    match word {
                        Some(w) if self.definition_errors.contains(&w) => Some(Err(json!({
                            "code": -32603,
                            "message": format!("no index for {w}"),
                        }))),
                        Some(w) => Some(Ok(self.definitions.get(&w).cloned().unwrap_or(Value::Null))),
                        None => Some(Ok(Value::Null)),
                    }
                }
                "textDocument/documentSymbol" => {
                    let uri = params["textDocument"]["uri"].as_str().unwrap_or_default();
                    Some(Ok(self.symbols.get(uri).cloned().unwrap_or_else(|| json!([]))))
                }
                "shutdown" => Some(Ok(Value::Null)),
                "exit" => return,
                _ if id.is_some() => Some(Err(json!({
                    "code": -32601,
                    "message": format!("method not found: {method}"),
                }))),
                _ => None,
            };

            let (Some(id), Some(reply)) = (id, reply) else {
                continue;
            };
            let frame = match reply {
                Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
            };
            if write_frame(&mut write, &frame).await.is_err() {
                return;
            }
        }
    }
}

/// The identifier under `(line, character)`, if any.
fn word_at(text: &str, line: u64, character: u64) -> Option<String> {
    let line: Vec<char> = text.lines().nth(usize::try_from(line).ok()?)?.chars().collect();
    let at = usize::try_from(character).ok()?;
    let is_word = |c: &char| c.is_ascii_alphanumeric() || *c == '_';
    if !line.get(at).is_some_and(is_word) {
        return None;
    }
    let start = line[..at].iter().rposition(|c| !is_word(c)).map_or(0, |i| i + 1);
    let end = line[at..].iter().position(|c| !is_word(c)).map_or(line.len(), |i| at + i);
    Some(line[start..end].iter().collect())
}

impl FakeIndexerHandle {
    /// Every message received so far, in order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().expect("fake indexer log poisoned").clone()
    }

    /// Methods of received requests and notifications, in order.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// How many messages with `method` were received.
    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Received messages that are responses (no method), e.g. acks.
    pub fn responses(&self) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m.get("method").is_none())
            .collect()
    }

    /// Wait for the server task to end (the client closed its side).
    pub async fn finished(&self) {
        let task = self.task.lock().expect("fake indexer task poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// A server-initiated request frame, e.g. `window/workDoneProgress/create`.
pub fn server_request(id: i64, method: &str, params: Value) -> Value {
    request(id, method, params)
}
