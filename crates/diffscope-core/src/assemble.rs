//! Context assembly: merge diff lines and definition ranges per file, fill
//! small gaps, elide large ones, and render labeled fenced excerpts.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use diffscope_config::ContextConfig;
use serde::Serialize;

use crate::diff::DiffAdditions;
use crate::resolver::{CollectedDefinitions, DefinitionRecord, SourceTree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Largest gap between essential lines that is printed instead of elided.
    pub max_gap: u32,
    /// Info string of the code fence.
    pub fence_language: String,
}

impl AssembleOptions {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            max_gap: config.max_gap,
            fence_language: config.fence_language.clone(),
        }
    }
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

/// One file's excerpt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextBlock {
    /// Path relative to the codebase root.
    pub label: String,
    /// Rendered lines, each newline-terminated, with elision markers.
    pub excerpt: String,
}

/// The final artifact: ordered per-file blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextBundle {
    pub blocks: Vec<ContextBlock>,
    #[serde(skip)]
    fence_language: String,
}

impl ContextBundle {
    pub fn new(fence_language: impl Into<String>) -> Self {
        Self {
            blocks: Vec::new(),
            fence_language: fence_language.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContextBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            write!(
                f,
                "{} (definition/diff context):\n\n```{}\n{}```\n",
                block.label, self.fence_language, block.excerpt
            )?;
        }
        Ok(())
    }
}

/// Diff-added lines plus every recorded range, clamped to `line_count`.
pub fn essential_lines(
    added: Option<&BTreeSet<u32>>,
    records: &[DefinitionRecord],
    line_count: u32,
) -> BTreeSet<u32> {
    let mut lines: BTreeSet<u32> = added
        .into_iter()
        .flatten()
        .copied()
        .filter(|&n| n < line_count)
        .collect();
    for record in records {
        if record.start_line >= line_count {
            continue;
        }
        let end = record.end_line.min(line_count - 1);
        lines.extend(record.start_line..=end);
    }
    lines
}

/// Add the lines between neighbours that are at most `max_gap` apart.
pub fn fill_gaps(essential: &BTreeSet<u32>, max_gap: u32) -> BTreeSet<u32> {
    let mut print = essential.clone();
    let mut iter = essential.iter().copied().peekable();
    while let (Some(current), Some(&next)) = (iter.next(), iter.peek()) {
        let gap = next - current - 1;
        if (1..=max_gap).contains(&gap) {
            print.extend(current + 1..next);
        }
    }
    print
}

/// Render `text` keeping the lines in `print`.
///
/// A run of skipped lines longer than `max_gap` becomes one
/// `// skipping lines A-B` marker with 1-based inclusive bounds. Shorter
/// runs can only sit before the first or after the last printed line and
/// are dropped without a marker.
pub fn render_excerpt(text: &str, print: &BTreeSet<u32>, max_gap: u32) -> String {
    let mut out = String::new();
    let mut skipped_from: Option<u32> = None;
    let mut count: u32 = 0;

    for (idx, line) in text.lines().enumerate() {
        let Ok(n) = u32::try_from(idx) else {
            break;
        };
        count = n + 1;
        if print.contains(&n) {
            if let Some(from) = skipped_from.take() {
                push_marker(&mut out, from, n - 1, max_gap);
            }
            out.push_str(line);
            out.push('\n');
        } else if skipped_from.is_none() {
            skipped_from = Some(n);
        }
    }
    if let Some(from) = skipped_from
        && !out.is_empty()
    {
        push_marker(&mut out, from, count - 1, max_gap);
    }
    out
}

fn push_marker(out: &mut String, first: u32, last: u32, max_gap: u32) {
    if last - first + 1 > max_gap {
        out.push_str(&format!("// skipping lines {}-{}\n", first + 1, last + 1));
    }
}

/// Display label for `path`: relative to `root` without leading separators,
/// or the path unchanged when it lies outside the root.
pub fn relative_label(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect::<PathBuf>()
            .to_string_lossy()
            .into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Build the bundle for one pass.
///
/// Diff files with additions come first in diff order, then files that only
/// hold definitions in first-record order. If nothing was resolved the
/// bundle is empty. Files unreadable at this point are skipped.
pub async fn assemble(
    tree: &dyn SourceTree,
    additions: &DiffAdditions,
    definitions: &CollectedDefinitions,
    options: &AssembleOptions,
) -> ContextBundle {
    let mut bundle = ContextBundle::new(options.fence_language.clone());
    if definitions.is_empty() {
        return bundle;
    }

    let mut files: Vec<(PathBuf, Option<&BTreeSet<u32>>)> = additions
        .changed_files()
        .map(|f| (tree.resolve(&f.path), Some(&f.lines)))
        .collect();
    for file in definitions.files() {
        if !files.iter().any(|(p, _)| p == file) {
            files.push((file.to_path_buf(), None));
        }
    }

    for (path, added) in files {
        let text = match tree.read(&path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let line_count = u32::try_from(text.lines().count()).unwrap_or(u32::MAX);
        let records = definitions.get(&path).unwrap_or_default();
        let essential = essential_lines(added, records, line_count);
        if essential.is_empty() {
            continue;
        }
        let print = fill_gaps(&essential, options.max_gap);
        let excerpt = render_excerpt(&text, &print, options.max_gap);
        let label = relative_label(&path, tree.root());
        tracing::debug!(
            file = %label,
            essential = essential.len(),
            printed = print.len(),
            "context block"
        );
        bundle.blocks.push(ContextBlock { label, excerpt });
    }
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(lines: &[u32]) -> BTreeSet<u32> {
        lines.iter().copied().collect()
    }

    fn numbered(n: u32) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn test_small_gap_is_filled() {
        let print = fill_gaps(&set(&[10, 12]), 5);
        assert_eq!(print, set(&[10, 11, 12]));
    }

    #[test]
    fn test_gap_at_threshold_is_filled() {
        let print = fill_gaps(&set(&[0, 6]), 5);
        assert_eq!(print, (0..=6).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn test_large_gap_is_not_filled() {
        let print = fill_gaps(&set(&[10, 20]), 5);
        assert_eq!(print, set(&[10, 20]));
    }

    #[test]
    fn test_large_gap_renders_marker() {
        let text = numbered(21);
        let excerpt = render_excerpt(&text, &set(&[10, 20]), 5);
        assert_eq!(
            excerpt,
            "// skipping lines 1-10\nline 11\n// skipping lines 12-20\nline 21\n"
        );
    }

    #[test]
    fn test_short_edge_runs_are_dropped_silently() {
        let text = numbered(10);
        let print: BTreeSet<u32> = (3..=7).collect();
        assert_eq!(
            render_excerpt(&text, &print, 5),
            "line 4\nline 5\nline 6\nline 7\nline 8\n"
        );
    }

    #[test]
    fn test_edge_run_at_threshold_has_no_marker() {
        let text = numbered(12);
        assert_eq!(render_excerpt(&text, &set(&[5]), 5), "line 6\n// skipping lines 7-12\n");
    }

    #[test]
    fn test_long_trailing_run_gets_marker() {
        let text = numbered(8);
        assert_eq!(
            render_excerpt(&text, &set(&[0, 1]), 5),
            "line 1\nline 2\n// skipping lines 3-8\n"
        );
    }

    #[test]
    fn test_nothing_printed_renders_nothing() {
        assert_eq!(render_excerpt(&numbered(3), &set(&[]), 5), "");
        assert_eq!(render_excerpt(&numbered(3), &set(&[9]), 5), "");
    }

    #[test]
    fn test_last_line_without_newline() {
        assert_eq!(render_excerpt("a\nb", &set(&[0, 1]), 5), "a\nb\n");
    }

    #[test]
    fn test_essential_lines_clamped() {
        let records = vec![DefinitionRecord {
            file: PathBuf::from("/x.h"),
            start_line: 3,
            end_line: 1_000_000,
            label: "big".to_string(),
        }];
        let added = set(&[0, 99]);
        assert_eq!(essential_lines(Some(&added), &records, 6), set(&[0, 3, 4, 5]));
    }

    #[test]
    fn test_essential_lines_record_past_end() {
        let records = vec![DefinitionRecord {
            file: PathBuf::from("/x.h"),
            start_line: 50,
            end_line: 60,
            label: "gone".to_string(),
        }];
        assert!(essential_lines(None, &records, 10).is_empty());
    }

    #[test]
    fn test_relative_label() {
        assert_eq!(
            relative_label(Path::new("/src/linux/include/b.h"), Path::new("/src/linux")),
            "include/b.h"
        );
        assert_eq!(
            relative_label(Path::new("/usr/include/stdio.h"), Path::new("/src/linux")),
            "/usr/include/stdio.h"
        );
    }

    #[test]
    fn test_bundle_rendering() {
        let mut bundle = ContextBundle::new("c");
        bundle.blocks.push(ContextBlock {
            label: "a.c".to_string(),
            excerpt: "foo();\n".to_string(),
        });
        bundle.blocks.push(ContextBlock {
            label: "b.h".to_string(),
            excerpt: "int foo(void);\n".to_string(),
        });
        assert_eq!(
            bundle.render(),
            "a.c (definition/diff context):\n\n```c\nfoo();\n```\n\n\nb.h (definition/diff context):\n\n```c\nint foo(void);\n```\n"
        );
    }

    #[test]
    fn test_empty_bundle_renders_empty_string() {
        assert_eq!(ContextBundle::new("c").render(), "");
    }
}
