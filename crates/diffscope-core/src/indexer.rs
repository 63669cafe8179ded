//! Launching the indexer process.
//!
//! The indexer (clangd by default) is spawned with piped stdio: stdin and
//! stdout carry the protocol, stderr is drained by [`crate::stderr`]. The
//! child is killed if its handle is dropped, so an aborted extraction never
//! leaves a background indexer running.

use std::path::PathBuf;
use std::process::Stdio;

use diffscope_config::IndexerConfig;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Errors from starting the indexer.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("indexer {0} stream was not captured")]
    MissingPipe(&'static str),
}

/// Command line for one indexer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// A running indexer with its stdio taken.
#[derive(Debug)]
pub struct IndexerProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl IndexerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build the command from `[indexer]` config.
    ///
    /// `--compile-commands-dir=<dir>` is appended when a directory is
    /// configured; relative directories are resolved against `root`, which
    /// is also the working directory unless one is configured.
    pub fn from_config(config: &IndexerConfig, root: &std::path::Path) -> Self {
        let mut args = config.args.clone();
        if let Some(dir) = &config.compile_commands_dir {
            let dir = if dir.is_absolute() {
                dir.clone()
            } else {
                root.join(dir)
            };
            args.push(format!("--compile-commands-dir={}", dir.display()));
        }
        let working_dir = match &config.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        };
        Self {
            program: config.command.clone(),
            args,
            working_dir: Some(working_dir),
        }
    }

    /// Spawn with piped stdio and take the pipes.
    pub fn spawn(&self) -> Result<IndexerProcess, IndexerError> {
        tracing::info!(
            program = %self.program,
            args = ?self.args,
            cwd = ?self.working_dir,
            "starting indexer"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| IndexerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(IndexerError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(IndexerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(IndexerError::MissingPipe("stderr"))?;

        tracing::debug!(pid = ?child.id(), "indexer started");
        Ok(IndexerProcess {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

impl std::fmt::Display for IndexerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_from_default_config() {
        let cmd = IndexerCommand::from_config(&IndexerConfig::default(), Path::new("/src/linux"));
        assert_eq!(cmd.program, "clangd");
        assert_eq!(
            cmd.args,
            vec!["--header-insertion=never", "--background-index", "--log=error"]
        );
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/src/linux")));
    }

    #[test]
    fn test_compile_commands_dir_relative_to_root() {
        let config = IndexerConfig {
            compile_commands_dir: Some(PathBuf::from("build")),
            ..IndexerConfig::default()
        };
        let cmd = IndexerCommand::from_config(&config, Path::new("/src/linux"));
        assert_eq!(
            cmd.args.last().map(String::as_str),
            Some("--compile-commands-dir=/src/linux/build")
        );
    }

    #[test]
    fn test_explicit_working_dir() {
        let config = IndexerConfig {
            working_dir: Some(PathBuf::from("/tmp/work")),
            ..IndexerConfig::default()
        };
        let cmd = IndexerCommand::from_config(&config, Path::new("/src/linux"));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp/work")));
    }

    #[test]
    fn test_display() {
        let cmd = IndexerCommand::new("clangd").arg("--log=error");
        assert_eq!(cmd.to_string(), "clangd --log=error");
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let cmd = IndexerCommand::new("diffscope-no-such-indexer-binary");
        let err = cmd.spawn().unwrap_err();
        assert!(matches!(err, IndexerError::Spawn { .. }));
        assert!(err.to_string().contains("diffscope-no-such-indexer-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_pipes_are_connected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut process = IndexerCommand::new("cat").spawn().unwrap();
        process.stdin.write_all(b"ping").await.unwrap();
        drop(process.stdin);
        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "ping");
        let status = process.child.wait().await.unwrap();
        assert!(status.success());
    }
}
