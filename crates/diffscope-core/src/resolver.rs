//! Definition resolution: from identifiers on changed lines to the source
//! ranges that define them.
//!
//! For every identifier the resolver asks the session for its definition,
//! narrows the answer to the defining symbol's range, and widens it to the
//! enclosing symbol when there is one (a struct around one of its members).
//! Misses are expected and skipped; only a fatal session error aborts.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use diffscope_config::IdentifierScope;

use crate::BoxFuture;
use crate::identifiers::{Identifier, identifiers_for_file};
use crate::lsp::types::{find_symbol, find_symbol_and_parent, path_to_uri, uri_to_path};
use crate::lsp::{Position, Session, SessionError, SymbolNode};

/// Read access to the codebase the diff applies to.
pub trait SourceTree: Send + Sync {
    /// Absolute root of the codebase.
    fn root(&self) -> &Path;

    /// Read a file by absolute path.
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<String>>;

    /// Resolve a diff path against the root.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }
}

/// [`SourceTree`] backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalSourceTree {
    root: PathBuf,
}

impl LocalSourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceTree for LocalSourceTree {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<String>> {
        Box::pin(tokio::fs::read_to_string(path))
    }
}

/// One recorded definition range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRecord {
    /// Absolute path of the defining file.
    pub file: PathBuf,
    /// 0-based, inclusive.
    pub start_line: u32,
    /// 0-based, inclusive.
    pub end_line: u32,
    /// The identifier, or `parent_of_<identifier>` for an enclosing scope.
    pub label: String,
}

/// Recorded definitions grouped by file, in first-record order.
///
/// A file appears only once it has a record. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedDefinitions {
    files: Vec<(PathBuf, Vec<DefinitionRecord>)>,
}

impl CollectedDefinitions {
    pub fn push(&mut self, record: DefinitionRecord) {
        match self.files.iter_mut().find(|(file, _)| *file == record.file) {
            Some((_, records)) => records.push(record),
            None => self.files.push((record.file.clone(), vec![record])),
        }
    }

    pub fn get(&self, file: &Path) -> Option<&[DefinitionRecord]> {
        self.files
            .iter()
            .find(|(f, _)| f == file)
            .map(|(_, records)| records.as_slice())
    }

    /// Files with records, in the order their first record arrived.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(f, _)| f.as_path())
    }

    pub fn records(&self) -> impl Iterator<Item = &DefinitionRecord> {
        self.files.iter().flat_map(|(_, records)| records.iter())
    }

    pub fn len(&self) -> usize {
        self.files.iter().map(|(_, records)| records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The session died; the whole pass is void.
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub scope: IdentifierScope,
}

/// Resolves identifiers for one extraction pass.
///
/// Holds the pass-wide seen-set: an identifier name is resolved at most
/// once, so a second same-named identifier in another scope reuses nothing
/// and is simply skipped.
///
/// A name is marked seen once its definition range is known, including
/// when that range was already recorded for another name. Names whose
/// lookup found nothing usable stay unmarked and are retried at their next
/// occurrence.
pub struct Resolver<'a> {
    session: &'a Session,
    tree: &'a dyn SourceTree,
    options: ResolveOptions,
    seen: HashSet<String>,
    recorded: HashSet<(PathBuf, u32, u32)>,
    symbols: HashMap<String, Vec<SymbolNode>>,
    collected: CollectedDefinitions,
}

/// Split a session error into "skip this one" and "abort the pass".
fn expected_miss<T>(result: Result<T, SessionError>, what: &str) -> Result<Option<T>, ResolveError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if !e.is_fatal() => {
            tracing::debug!(error = %e, "{what} failed; skipping");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl<'a> Resolver<'a> {
    pub fn new(session: &'a Session, tree: &'a dyn SourceTree, options: ResolveOptions) -> Self {
        Self {
            session,
            tree,
            options,
            seen: HashSet::new(),
            recorded: HashSet::new(),
            symbols: HashMap::new(),
            collected: CollectedDefinitions::default(),
        }
    }

    /// Resolve the identifiers of one changed file.
    ///
    /// `path` is as named by the diff; `added` are its added lines.
    pub async fn resolve_file(&mut self, path: &Path, added: &BTreeSet<u32>) -> Result<(), ResolveError> {
        let abs = self.tree.resolve(path);
        let text = match self.tree.read(&abs).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(path = %abs.display(), error = %e, "changed file unreadable; skipping");
                return Ok(());
            }
        };
        let Some(uri) = path_to_uri(&abs) else {
            tracing::debug!(path = %abs.display(), "no file URI for path; skipping");
            return Ok(());
        };

        self.session.open_document(&uri, &text).await?;
        self.symbols_for(&uri).await?;

        let identifiers = identifiers_for_file(&text, added, self.options.scope);
        tracing::debug!(
            path = %path.display(),
            identifiers = identifiers.len(),
            "resolving changed file"
        );
        for identifier in &identifiers {
            if self.seen.contains(&identifier.text) {
                continue;
            }
            self.resolve_identifier(&uri, identifier).await?;
        }
        Ok(())
    }

    async fn resolve_identifier(&mut self, uri: &str, identifier: &Identifier) -> Result<(), ResolveError> {
        let name = identifier.text.as_str();
        let position = Position {
            line: identifier.line,
            character: identifier.column,
        };
        let Some(locations) = expected_miss(self.session.definition(uri, position).await, "definition")? else {
            return Ok(());
        };
        let Some(location) = locations.into_iter().next() else {
            tracing::trace!(identifier = name, "no definition");
            return Ok(());
        };

        let Some(def_path) = uri_to_path(&location.uri) else {
            tracing::debug!(identifier = name, uri = %location.uri, "definition outside the filesystem");
            return Ok(());
        };
        let def_text = match self.tree.read(&def_path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(
                    identifier = name,
                    path = %def_path.display(),
                    error = %e,
                    "definition file unreadable"
                );
                return Ok(());
            }
        };
        self.session.open_document(&location.uri, &def_text).await?;
        let symbols = self.symbols_for(&location.uri).await?;

        let point = location.range.start.line;
        let (mut start, mut end) = match find_symbol(symbols, name, point) {
            Some(symbol) => (symbol.start_line, symbol.end_line),
            None => (location.range.start.line, location.range.end.line),
        };
        let mut label = name.to_string();
        if let Some((_, Some(parent))) = find_symbol_and_parent(symbols, name, start) {
            start = parent.start_line;
            end = parent.end_line;
            label = format!("parent_of_{name}");
        }

        if self.recorded.insert((def_path.clone(), start, end)) {
            tracing::debug!(
                identifier = name,
                path = %def_path.display(),
                start,
                end,
                %label,
                "definition recorded"
            );
            self.collected.push(DefinitionRecord {
                file: def_path,
                start_line: start,
                end_line: end,
                label,
            });
        } else {
            tracing::trace!(identifier = name, start, end, "range already recorded");
        }
        self.seen.insert(identifier.text.clone());
        Ok(())
    }

    /// Symbol tree for `uri`, fetched once per pass. A failed fetch caches
    /// an empty tree.
    async fn symbols_for(&mut self, uri: &str) -> Result<&[SymbolNode], ResolveError> {
        if !self.symbols.contains_key(uri) {
            let tree = expected_miss(self.session.document_symbols(uri).await, "documentSymbol")?
                .unwrap_or_default();
            self.symbols.insert(uri.to_string(), tree);
        }
        Ok(self.symbols.get(uri).map(Vec::as_slice).unwrap_or_default())
    }

    pub fn finish(self) -> CollectedDefinitions {
        self.collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(file: &str, start: u32, end: u32, label: &str) -> DefinitionRecord {
        DefinitionRecord {
            file: PathBuf::from(file),
            start_line: start,
            end_line: end,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_collected_groups_in_first_record_order() {
        let mut collected = CollectedDefinitions::default();
        assert!(collected.is_empty());
        collected.push(record("/src/b.h", 38, 46, "parent_of_foo"));
        collected.push(record("/src/a.h", 1, 2, "x"));
        collected.push(record("/src/b.h", 60, 61, "y"));

        let files: Vec<_> = collected.files().collect();
        assert_eq!(files, vec![Path::new("/src/b.h"), Path::new("/src/a.h")]);
        assert_eq!(collected.get(Path::new("/src/b.h")).map(<[_]>::len), Some(2));
        assert_eq!(collected.len(), 3);
        assert!(collected.get(Path::new("/src/c.h")).is_none());
    }

    #[test]
    fn test_source_tree_resolves_relative_paths() {
        let tree = LocalSourceTree::new("/src/linux");
        assert_eq!(
            tree.resolve(Path::new("drivers/a.c")),
            PathBuf::from("/src/linux/drivers/a.c")
        );
        assert_eq!(tree.resolve(Path::new("/abs/b.h")), PathBuf::from("/abs/b.h"));
    }

    #[tokio::test]
    async fn test_local_source_tree_reads() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.c"), "int x;\n").unwrap();
        let tree = LocalSourceTree::new(dir.path());
        let text = tree.read(&dir.path().join("a.c")).await.unwrap();
        assert_eq!(text, "int x;\n");
        assert!(tree.read(&dir.path().join("missing.c")).await.is_err());
    }
}
