//! One extraction pass, end to end.
//!
//! ```text
//! diff text ──► DiffAdditions ──► Session (spawn + warm-up + index wait)
//!                                    │
//!                                    ▼
//!                  Resolver (per changed file) ──► CollectedDefinitions
//!                                                        │
//!                                                        ▼
//!                                          assemble ──► ContextBundle
//! ```

use std::path::{Path, PathBuf};

use diffscope_config::AppConfig;

use crate::assemble::{AssembleOptions, ContextBundle, assemble};
use crate::diff::DiffAdditions;
use crate::indexer::IndexerCommand;
use crate::lsp::progress::WaitOptions;
use crate::lsp::types::path_to_uri;
use crate::lsp::{IndexingOutcome, Session, SessionError, SessionOptions};
use crate::resolver::{
    CollectedDefinitions, LocalSourceTree, ResolveError, ResolveOptions, Resolver, SourceTree,
};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The indexer session could not be started or died mid-pass.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<ResolveError> for ExtractError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Session(e) => Self::Session(e),
        }
    }
}

/// Everything one pass produced.
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub bundle: ContextBundle,
    pub additions: DiffAdditions,
    pub definitions: CollectedDefinitions,
    /// `None` when no session was needed or the index wait was disabled.
    pub indexing: Option<IndexingOutcome>,
}

/// Runs extraction passes against one codebase.
pub struct ContextExtractor {
    config: AppConfig,
    tree: Box<dyn SourceTree>,
}

impl ContextExtractor {
    pub fn new(config: AppConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            tree: Box::new(LocalSourceTree::new(root)),
        }
    }

    /// Read files through `tree` instead of the local filesystem.
    pub fn with_source_tree(mut self, tree: impl SourceTree + 'static) -> Self {
        self.tree = Box::new(tree);
        self
    }

    pub fn root(&self) -> &Path {
        self.tree.root()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run a full pass: spawn the indexer, resolve, shut down, assemble.
    ///
    /// The session is shut down whether or not resolution succeeded.
    pub async fn extract(&self, diff_text: &str) -> Result<ExtractOutcome, ExtractError> {
        let additions = DiffAdditions::parse(diff_text);
        if !additions.has_additions() {
            tracing::info!(files = additions.len(), "diff adds no lines; nothing to extract");
            return Ok(self.empty_outcome(additions));
        }

        let command = IndexerCommand::from_config(&self.config.indexer, self.root());
        let options = SessionOptions::from_config(&self.config, self.root());
        let mut session = Session::spawn(&command, options).await?;

        let result = self.run(&session, &additions).await;
        session.shutdown().await;
        let (definitions, indexing) = result?;

        Ok(self.finish(additions, definitions, indexing).await)
    }

    /// Run a pass over an already connected session. The caller keeps
    /// ownership and is responsible for shutting it down.
    pub async fn extract_with_session(
        &self,
        session: &Session,
        diff_text: &str,
    ) -> Result<ExtractOutcome, ExtractError> {
        let additions = DiffAdditions::parse(diff_text);
        if !additions.has_additions() {
            return Ok(self.empty_outcome(additions));
        }
        let (definitions, indexing) = self.run(session, &additions).await?;
        Ok(self.finish(additions, definitions, indexing).await)
    }

    async fn run(
        &self,
        session: &Session,
        additions: &DiffAdditions,
    ) -> Result<(CollectedDefinitions, Option<IndexingOutcome>), ExtractError> {
        self.warm_up(session, additions).await?;

        let indexing = if self.config.indexing.wait {
            let wait = WaitOptions::from_config(&self.config.indexing);
            let outcome = session.wait_for_indexing(&wait).await?;
            tracing::info!(?outcome, "background indexing wait finished");
            Some(outcome)
        } else {
            None
        };

        let options = ResolveOptions {
            scope: self.config.context.identifier_scope,
        };
        let mut resolver = Resolver::new(session, self.tree.as_ref(), options);
        for file in additions.changed_files() {
            resolver.resolve_file(&file.path, &file.lines).await?;
        }
        let definitions = resolver.finish();
        tracing::info!(
            definitions = definitions.len(),
            files = definitions.files().count(),
            "definitions resolved"
        );
        Ok((definitions, indexing))
    }

    /// Open every readable diff file so the indexer starts on them before
    /// the first definition request.
    async fn warm_up(&self, session: &Session, additions: &DiffAdditions) -> Result<(), SessionError> {
        for file in additions.files() {
            let path = self.tree.resolve(&file.path);
            let Ok(text) = self.tree.read(&path).await else {
                tracing::debug!(path = %path.display(), "diff file not present; not opening");
                continue;
            };
            if let Some(uri) = path_to_uri(&path) {
                session.open_document(&uri, &text).await?;
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        additions: DiffAdditions,
        definitions: CollectedDefinitions,
        indexing: Option<IndexingOutcome>,
    ) -> ExtractOutcome {
        let options = AssembleOptions::from_config(&self.config.context);
        let bundle = assemble(self.tree.as_ref(), &additions, &definitions, &options).await;
        ExtractOutcome {
            bundle,
            additions,
            definitions,
            indexing,
        }
    }

    fn empty_outcome(&self, additions: DiffAdditions) -> ExtractOutcome {
        ExtractOutcome {
            bundle: ContextBundle::new(self.config.context.fence_language.clone()),
            additions,
            definitions: CollectedDefinitions::default(),
            indexing: None,
        }
    }
}

impl std::fmt::Debug for ContextExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextExtractor")
            .field("root", &self.root())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_diff_without_additions_spawns_nothing() {
        let mut config = AppConfig::default();
        config.indexer.command = "diffscope-no-such-indexer-binary".to_string();
        let extractor = ContextExtractor::new(config, "/nonexistent");

        let diff = "--- a/x.c\n+++ b/x.c\n@@ -1,2 +1,1 @@\n-gone\n kept\n";
        let outcome = extractor.extract(diff).await.unwrap();
        assert!(outcome.bundle.is_empty());
        assert_eq!(outcome.bundle.render(), "");
        assert!(outcome.definitions.is_empty());
        assert_eq!(outcome.indexing, None);
        assert_eq!(outcome.additions.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_diff() {
        let extractor = ContextExtractor::new(AppConfig::default(), "/nonexistent");
        let outcome = extractor.extract("").await.unwrap();
        assert!(outcome.bundle.is_empty());
        assert!(outcome.additions.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_session_error() {
        let mut config = AppConfig::default();
        config.indexer.command = "diffscope-no-such-indexer-binary".to_string();
        let extractor = ContextExtractor::new(config, "/nonexistent");

        let diff = "+++ b/x.c\n@@ -0,0 +1 @@\n+int x;\n";
        let err = extractor.extract(diff).await.unwrap_err();
        assert!(matches!(err, ExtractError::Session(SessionError::Spawn(_))));
    }
}
