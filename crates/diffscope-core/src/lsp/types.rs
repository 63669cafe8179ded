//! The small slice of LSP types the resolver needs, plus normalizers that
//! fold the protocol's alternative result shapes into one form.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationLink {
    target_uri: String,
    target_selection_range: Range,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DefinitionResult {
    Single(Location),
    Locations(Vec<Location>),
    Links(Vec<LocationLink>),
}

#[derive(Debug, Deserialize)]
struct DocumentSymbol {
    name: String,
    range: Range,
    #[serde(default)]
    children: Vec<DocumentSymbol>,
}

#[derive(Debug, Deserialize)]
struct SymbolInformation {
    name: String,
    location: Location,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentSymbolResult {
    Nested(Vec<DocumentSymbol>),
    Flat(Vec<SymbolInformation>),
}

/// A named entity in a file's symbol tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolNode {
    pub name: String,
    /// 0-based, inclusive.
    pub start_line: u32,
    /// 0-based, inclusive.
    pub end_line: u32,
    pub children: Vec<SymbolNode>,
}

impl SymbolNode {
    pub fn new(name: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<SymbolNode>) -> Self {
        self.children = children;
        self
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

impl From<DocumentSymbol> for SymbolNode {
    fn from(sym: DocumentSymbol) -> Self {
        Self {
            name: sym.name,
            start_line: sym.range.start.line,
            end_line: sym.range.end.line,
            children: sym.children.into_iter().map(SymbolNode::from).collect(),
        }
    }
}

/// Normalize a `textDocument/definition` result to a list of locations.
///
/// Accepts `null`, a single `Location`, `Location[]`, or `LocationLink[]`.
/// Links are reduced to their target URI and selection range.
pub fn definition_locations(result: Value) -> Result<Vec<Location>, serde_json::Error> {
    let parsed: Option<DefinitionResult> = serde_json::from_value(result)?;
    Ok(match parsed {
        None => Vec::new(),
        Some(DefinitionResult::Single(loc)) => vec![loc],
        Some(DefinitionResult::Locations(locs)) => locs,
        Some(DefinitionResult::Links(links)) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    })
}

/// Normalize a `textDocument/documentSymbol` result to a symbol forest.
///
/// Hierarchical `DocumentSymbol[]` keeps its nesting; flat
/// `SymbolInformation[]` becomes a list of leaves using `location.range`.
pub fn symbol_tree(result: Value) -> Result<Vec<SymbolNode>, serde_json::Error> {
    let parsed: Option<DocumentSymbolResult> = serde_json::from_value(result)?;
    Ok(match parsed {
        None => Vec::new(),
        Some(DocumentSymbolResult::Nested(symbols)) => {
            symbols.into_iter().map(SymbolNode::from).collect()
        }
        Some(DocumentSymbolResult::Flat(symbols)) => symbols
            .into_iter()
            .map(|s| {
                SymbolNode::new(
                    s.name,
                    s.location.range.start.line,
                    s.location.range.end.line,
                )
            })
            .collect(),
    })
}

/// Pre-order walk over a forest with each node's parent.
fn walk(forest: &[SymbolNode]) -> impl Iterator<Item = (&SymbolNode, Option<&SymbolNode>)> {
    let mut stack: Vec<(&SymbolNode, Option<&SymbolNode>)> =
        forest.iter().rev().map(|n| (n, None)).collect();
    std::iter::from_fn(move || {
        let (node, parent) = stack.pop()?;
        stack.extend(node.children.iter().rev().map(|c| (c, Some(node))));
        Some((node, parent))
    })
}

/// First node named `name`, preferring one whose range contains `line`.
pub fn find_symbol<'a>(forest: &'a [SymbolNode], name: &str, line: u32) -> Option<&'a SymbolNode> {
    let mut first = None;
    for (node, _) in walk(forest) {
        if node.name != name {
            continue;
        }
        if node.contains_line(line) {
            return Some(node);
        }
        if first.is_none() {
            first = Some(node);
        }
    }
    first
}

/// First node (depth-first, pre-order) named `name` whose range contains
/// `line`, with its immediate parent.
pub fn find_symbol_and_parent<'a>(
    forest: &'a [SymbolNode],
    name: &str,
    line: u32,
) -> Option<(&'a SymbolNode, Option<&'a SymbolNode>)> {
    walk(forest).find(|(node, _)| node.name == name && node.contains_line(line))
}

/// `file://` URI for an absolute path.
pub fn path_to_uri(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

/// Filesystem path for a `file://` URI; `None` for any other scheme.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let url = Url::parse(uri).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    url.to_file_path().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn loc(uri: &str, line: u32) -> Value {
        json!({
            "uri": uri,
            "range": {
                "start": {"line": line, "character": 4},
                "end": {"line": line, "character": 7}
            }
        })
    }

    #[test]
    fn test_definition_null_and_empty() {
        assert!(definition_locations(Value::Null).unwrap().is_empty());
        assert!(definition_locations(json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_definition_single_and_list() {
        let single = definition_locations(loc("file:///a.h", 3)).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].range.start.line, 3);

        let list = definition_locations(json!([loc("file:///a.h", 3), loc("file:///b.h", 9)])).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].uri, "file:///b.h");
    }

    #[test]
    fn test_definition_links() {
        let links = json!([{
            "targetUri": "file:///b.h",
            "targetRange": {"start": {"line": 38, "character": 0}, "end": {"line": 46, "character": 2}},
            "targetSelectionRange": {"start": {"line": 40, "character": 8}, "end": {"line": 40, "character": 11}}
        }]);
        let locs = definition_locations(links).unwrap();
        assert_eq!(locs[0].uri, "file:///b.h");
        assert_eq!(locs[0].range.start, Position { line: 40, character: 8 });
    }

    #[test]
    fn test_definition_rejects_wrong_shape() {
        assert!(definition_locations(json!({"nope": 1})).is_err());
    }

    fn sym(name: &str, start: u32, end: u32, children: Vec<Value>) -> Value {
        json!({
            "name": name,
            "kind": 23,
            "range": {"start": {"line": start, "character": 0}, "end": {"line": end, "character": 1}},
            "selectionRange": {"start": {"line": start, "character": 0}, "end": {"line": start, "character": 1}},
            "children": children
        })
    }

    #[test]
    fn test_symbol_tree_hierarchical() {
        let tree = symbol_tree(json!([sym("Bar", 38, 46, vec![sym("foo", 40, 44, vec![])])])).unwrap();
        assert_eq!(
            tree,
            vec![SymbolNode::new("Bar", 38, 46).with_children(vec![SymbolNode::new("foo", 40, 44)])]
        );
    }

    #[test]
    fn test_symbol_tree_flat() {
        let flat = json!([
            {"name": "main", "kind": 12, "location": loc("file:///a.c", 10)},
            {"name": "helper", "kind": 12, "location": loc("file:///a.c", 20)}
        ]);
        let tree = symbol_tree(flat).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].name, "helper");
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn test_symbol_tree_null() {
        assert!(symbol_tree(Value::Null).unwrap().is_empty());
    }

    fn sample_forest() -> Vec<SymbolNode> {
        vec![
            SymbolNode::new("first", 0, 5),
            SymbolNode::new("Bar", 38, 46).with_children(vec![
                SymbolNode::new("dev", 39, 39),
                SymbolNode::new("foo", 40, 44),
            ]),
            SymbolNode::new("Baz", 50, 60).with_children(vec![SymbolNode::new("dev", 52, 52)]),
        ]
    }

    #[test]
    fn test_find_symbol_and_parent() {
        let forest = sample_forest();
        let (node, parent) = find_symbol_and_parent(&forest, "foo", 40).unwrap();
        assert_eq!(node.name, "foo");
        assert_eq!(parent.map(|p| p.name.as_str()), Some("Bar"));

        let (node, parent) = find_symbol_and_parent(&forest, "first", 2).unwrap();
        assert_eq!(node.start_line, 0);
        assert!(parent.is_none());

        assert!(find_symbol_and_parent(&forest, "foo", 45).is_none());
    }

    #[test]
    fn test_find_symbol_and_parent_uses_line() {
        let forest = sample_forest();
        let (_, parent) = find_symbol_and_parent(&forest, "dev", 52).unwrap();
        assert_eq!(parent.map(|p| p.name.as_str()), Some("Baz"));
    }

    #[test]
    fn test_find_symbol_prefers_containing_range() {
        let forest = sample_forest();
        assert_eq!(find_symbol(&forest, "dev", 52).unwrap().start_line, 52);
        assert_eq!(find_symbol(&forest, "dev", 0).unwrap().start_line, 39);
        assert!(find_symbol(&forest, "missing", 0).is_none());
    }

    #[test]
    fn test_deep_tree_does_not_recurse() {
        let mut node = SymbolNode::new("leaf", 0, 0);
        for depth in 0..10_000 {
            node = SymbolNode::new(format!("n{depth}"), 0, 100).with_children(vec![node]);
        }
        let forest = vec![node];
        let (found, parent) = find_symbol_and_parent(&forest, "leaf", 0).unwrap();
        assert_eq!(found.name, "leaf");
        assert_eq!(parent.unwrap().name, "n0");
        // Drop iteratively; the derived drop would recurse 10k frames deep.
        let mut stack = forest;
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.children);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_uri_round_trip() {
        let uri = path_to_uri(Path::new("/src/linux/include/my header.h")).unwrap();
        assert_eq!(uri, "file:///src/linux/include/my%20header.h");
        assert_eq!(
            uri_to_path(&uri).unwrap(),
            PathBuf::from("/src/linux/include/my header.h")
        );
    }

    #[test]
    fn test_uri_edge_cases() {
        assert!(path_to_uri(Path::new("relative/path.c")).is_none());
        assert!(uri_to_path("untitled:Untitled-1").is_none());
        assert!(uri_to_path("not a uri").is_none());
    }
}
