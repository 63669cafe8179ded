//! Minimal LSP client for talking to a C/C++ indexer.
//!
//! - [`codec`] handles `Content-Length` framing
//! - [`message`] classifies JSON-RPC messages and builds outgoing ones
//! - [`types`] holds the few protocol types we read, plus normalizers
//! - [`progress`] tracks background-index progress
//! - [`session`] owns the streams, the reader task, and the request API

pub mod codec;
pub mod message;
pub mod progress;
pub mod session;
pub mod types;

pub use codec::{FrameError, FrameReader, encode_frame};
pub use message::{Incoming, RequestId, ResponseError};
pub use progress::{IndexProgress, IndexingOutcome, WaitOptions};
pub use session::{FatalCause, Session, SessionError, SessionOptions, SessionState};
pub use types::{Location, Position, Range, SymbolNode, path_to_uri, uri_to_path};
