//! Unified diff parsing: which new-file lines did a patch add?
//!
//! Only the new side of each hunk matters here: added lines are recorded by
//! their 0-based line number in the post-patch file, context lines advance
//! the cursor, removed lines don't exist in the new file and are skipped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Added lines of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAdditions {
    /// Path as it appears after `+++ b/`, relative to the codebase root.
    pub path: PathBuf,
    /// 0-based line numbers in the new version of the file.
    pub lines: BTreeSet<u32>,
}

/// Per-file added lines of a whole diff, in diff order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DiffAdditions {
    files: Vec<FileAdditions>,
}

impl DiffAdditions {
    /// Parse diff text (any line endings).
    pub fn parse(text: &str) -> Self {
        parse_diff(text.lines())
    }

    /// Added lines for `path`, if the diff touches it.
    pub fn get(&self, path: &Path) -> Option<&BTreeSet<u32>> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| &f.lines)
    }

    /// Files in diff order, including those with no added lines.
    pub fn files(&self) -> impl Iterator<Item = &FileAdditions> {
        self.files.iter()
    }

    /// Files with at least one added line.
    pub fn changed_files(&self) -> impl Iterator<Item = &FileAdditions> {
        self.files.iter().filter(|f| !f.lines.is_empty())
    }

    /// Whether any file has an added line.
    pub fn has_additions(&self) -> bool {
        self.files.iter().any(|f| !f.lines.is_empty())
    }

    /// Total number of added lines across all files.
    pub fn added_line_count(&self) -> usize {
        self.files.iter().map(|f| f.lines.len()).sum()
    }

    /// Number of files named by the diff.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn start_file(&mut self, path: PathBuf) -> usize {
        if let Some(idx) = self.files.iter().position(|f| f.path == path) {
            self.files[idx].lines.clear();
            idx
        } else {
            self.files.push(FileAdditions {
                path,
                lines: BTreeSet::new(),
            });
            self.files.len() - 1
        }
    }
}

/// Build [`DiffAdditions`] from diff lines without trailing newlines.
pub fn parse_diff<'a>(lines: impl IntoIterator<Item = &'a str>) -> DiffAdditions {
    let mut additions = DiffAdditions::default();
    let mut current: Option<usize> = None;
    let mut cursor: Option<u32> = None;

    for line in lines {
        if let Some(path) = line.strip_prefix("+++ b/") {
            current = Some(additions.start_file(PathBuf::from(path.trim())));
            cursor = None;
        } else if line.starts_with("+++ ") {
            // `/dev/null` or a non-git prefix: nothing we can attribute lines to.
            current = None;
            cursor = None;
        } else if line.starts_with("diff --git ") {
            cursor = None;
        } else if line.starts_with("@@") {
            if let Some(start) = hunk_new_start(line) {
                cursor = Some(start.saturating_sub(1));
            }
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
        } else if line.starts_with('+') {
            if let (Some(idx), Some(n)) = (current, cursor.as_mut()) {
                additions.files[idx].lines.insert(*n);
                *n += 1;
            }
        } else if line.starts_with('-') {
            // Removed lines don't exist in the new file.
        } else if let Some(n) = cursor.as_mut() {
            *n += 1;
        }
    }

    additions
}

/// Extract `c` from `@@ -a[,b] +c[,d] @@`.
fn hunk_new_start(header: &str) -> Option<u32> {
    let rest = header.strip_prefix("@@ -")?;
    let (old, rest) = rest.split_once(' ')?;
    parse_range(old)?;
    let new = rest.strip_prefix('+')?;
    let (new, tail) = new.split_once(' ')?;
    if !tail.starts_with("@@") {
        return None;
    }
    parse_range(new)
}

fn parse_range(range: &str) -> Option<u32> {
    let (start, count) = match range.split_once(',') {
        Some((start, count)) => (start, Some(count)),
        None => (range, None),
    };
    if let Some(count) = count {
        count.parse::<u32>().ok()?;
    }
    start.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines_of(additions: &DiffAdditions, path: &str) -> Vec<u32> {
        additions
            .get(Path::new(path))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_three_added_lines() {
        let diff = "\
--- a/drivers/foo.c
+++ b/drivers/foo.c
@@ -1,3 +5,3 @@
+int a;
+int b;
+int c;";
        let additions = DiffAdditions::parse(diff);
        assert_eq!(lines_of(&additions, "drivers/foo.c"), vec![4, 5, 6]);
    }

    #[test]
    fn test_context_and_removed_lines() {
        let diff = "\
+++ b/a.c
@@ -10,4 +10,5 @@ static int probe(void)
 context one
-removed
+added one
 context two
+added two
+added three";
        let additions = DiffAdditions::parse(diff);
        // context one = 9, added one = 10, context two = 11, then 12, 13
        assert_eq!(lines_of(&additions, "a.c"), vec![10, 12, 13]);
    }

    #[test]
    fn test_multiple_hunks_and_files() {
        let diff = "\
diff --git a/a.c b/a.c
index 111..222 100644
--- a/a.c
+++ b/a.c
@@ -1 +1,2 @@
 first
+second
@@ -20,2 +21,3 @@
 x
+y
 z
diff --git a/include/b.h b/include/b.h
--- a/include/b.h
+++ b/include/b.h
@@ -5,0 +6 @@
+#define B 1";
        let additions = DiffAdditions::parse(diff);
        assert_eq!(additions.len(), 2);
        assert_eq!(lines_of(&additions, "a.c"), vec![1, 21]);
        assert_eq!(lines_of(&additions, "include/b.h"), vec![5]);
        let order: Vec<_> = additions.files().map(|f| f.path.clone()).collect();
        assert_eq!(
            order,
            vec![PathBuf::from("a.c"), PathBuf::from("include/b.h")]
        );
    }

    #[test]
    fn test_no_newline_marker_does_not_advance() {
        let diff = "\
+++ b/a.c
@@ -1,1 +1,2 @@
-old
\\ No newline at end of file
+new
+newer";
        let additions = DiffAdditions::parse(diff);
        assert_eq!(lines_of(&additions, "a.c"), vec![0, 1]);
    }

    #[test]
    fn test_deleted_file_records_nothing() {
        let diff = "\
--- a/gone.c
+++ /dev/null
@@ -1,2 +0,0 @@
-a
-b";
        let additions = DiffAdditions::parse(diff);
        assert!(additions.is_empty());
        assert!(!additions.has_additions());
    }

    #[test]
    fn test_no_hunks_is_empty() {
        let additions = DiffAdditions::parse("+++ b/a.c\n+not in a hunk\n");
        assert_eq!(additions.len(), 1);
        assert!(!additions.has_additions());
        assert_eq!(additions.changed_files().count(), 0);
    }

    #[test]
    fn test_empty_input() {
        let additions = DiffAdditions::parse("");
        assert!(additions.is_empty());
        assert_eq!(additions.added_line_count(), 0);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let diff = "+++ b/x.c\n@@ -3,2 +3,3 @@\n a\n+b\n c\n";
        assert_eq!(DiffAdditions::parse(diff), DiffAdditions::parse(diff));
    }

    #[test]
    fn test_repeated_header_resets_file() {
        let diff = "\
+++ b/a.c
@@ -1 +1,2 @@
+one
+++ b/a.c
@@ -8 +8,2 @@
+eight";
        let additions = DiffAdditions::parse(diff);
        assert_eq!(additions.len(), 1);
        assert_eq!(lines_of(&additions, "a.c"), vec![7]);
    }

    #[test]
    fn test_hunk_header_parsing() {
        assert_eq!(hunk_new_start("@@ -1,3 +5,3 @@"), Some(5));
        assert_eq!(hunk_new_start("@@ -1 +7 @@ fn ctx()"), Some(7));
        assert_eq!(hunk_new_start("@@ -0,0 +1,4 @@"), Some(1));
        assert_eq!(hunk_new_start("@@ -x +1 @@"), None);
        assert_eq!(hunk_new_start("@@ garbage"), None);
    }

    #[test]
    fn test_serializes_as_list() {
        let additions = DiffAdditions::parse("+++ b/a.c\n@@ -1 +1 @@\n+x\n");
        let json = serde_json::to_value(&additions).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "path": "a.c", "lines": [0] }])
        );
    }
}
