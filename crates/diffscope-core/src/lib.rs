#![deny(unsafe_code)]

//! diffscope core: turn a unified diff into source context.
//!
//! Given a diff against a C/C++ codebase, the core finds the lines the diff
//! adds, asks a language-server indexer (clangd) where each identifier on
//! those lines is defined, and renders the changed and defining code as
//! compact labeled excerpts.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future for trait methods used through
/// `&dyn Trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Gap filling, elision, and rendering of the context bundle.
pub mod assemble;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Unified diff parsing into per-file added lines.
pub mod diff;
/// Orchestration of one extraction pass.
pub mod extract;
/// Identifier scanning on source lines.
pub mod identifiers;
/// Indexer process launch.
pub mod indexer;
/// JSON-RPC/LSP client session with the indexer.
pub mod lsp;
/// Definition lookup and range widening.
pub mod resolver;
/// Indexer stderr draining and tail capture.
pub mod stderr;

pub use assemble::{ContextBlock, ContextBundle};
pub use diff::{DiffAdditions, FileAdditions};
pub use extract::{ContextExtractor, ExtractError, ExtractOutcome};
pub use identifiers::{Identifier, extract_identifiers};
pub use indexer::IndexerCommand;
pub use lsp::{Session, SessionError, SessionOptions};
pub use resolver::{CollectedDefinitions, DefinitionRecord, LocalSourceTree, SourceTree};
