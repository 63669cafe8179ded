#![deny(unsafe_code)]

//! Shared test utilities for the diffscope workspace.
//!
//! Provides a scripted fake indexer, temporary source trees, config builders,
//! and tracing helpers so that individual crate tests stay concise and
//! consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! diffscope-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fake_indexer;
pub mod source;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use fake_indexer::{FakeIndexer, FakeIndexerHandle};
pub use source::SourceFixture;
