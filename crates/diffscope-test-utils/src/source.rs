//! Temporary source trees.

use std::path::{Path, PathBuf};

use diffscope_core::lsp::path_to_uri;
use tempfile::TempDir;

/// A codebase root in a temp directory, deleted on drop.
///
/// The root is canonicalized so paths built here match the ones that come
/// back from `file://` URIs.
pub struct SourceFixture {
    root: PathBuf,
    _dir: TempDir,
}

impl SourceFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir
            .path()
            .canonicalize()
            .expect("failed to canonicalize temp dir");
        Self { root, _dir: dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `rel` under the root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// `file://` URI of `rel` under the root.
    pub fn uri(&self, rel: &str) -> String {
        path_to_uri(&self.path(rel)).expect("fixture path has no file URI")
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create fixture dirs");
        }
        std::fs::write(&path, contents).expect("failed to write fixture file");
        path
    }
}

impl Default for SourceFixture {
    fn default() -> Self {
        Self::new()
    }
}
