//! C identifier tokens and their positions on a source line.

use std::collections::BTreeSet;

use diffscope_config::IdentifierScope;

/// One identifier occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub text: String,
    /// 0-based line number.
    pub line: u32,
    /// 0-based column in UTF-16 code units.
    pub column: u32,
}

/// Every `[_A-Za-z][_A-Za-z0-9]*` token on `line` that stands alone as a word.
///
/// A token glued to a non-ASCII word character (`λfoo`) is not a word
/// boundary match and is skipped as a whole, as is a run starting with a
/// digit (`0x1f`). Keywords are not filtered.
pub fn extract_identifiers(line: &str, line_number: u32) -> Vec<Identifier> {
    let mut found = Vec::new();
    let mut utf16_col: u32 = 0;
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if !is_word_char(c) {
            utf16_col += c.len_utf16() as u32;
            chars.next();
            continue;
        }

        let run_col = utf16_col;
        let mut end = start;
        let mut ascii_only = true;
        while let Some(&(idx, c)) = chars.peek() {
            if !is_word_char(c) {
                break;
            }
            ascii_only &= c.is_ascii();
            utf16_col += c.len_utf16() as u32;
            end = idx + c.len_utf8();
            chars.next();
        }

        let word = &line[start..end];
        if ascii_only && !word.starts_with(|c: char| c.is_ascii_digit()) {
            found.push(Identifier {
                text: word.to_string(),
                line: line_number,
                column: run_col,
            });
        }
    }

    found
}

/// Identifiers for one changed file under the configured scanning scope.
///
/// `added` holds the diff's added lines; with [`IdentifierScope::FullFile`]
/// every line of `text` is scanned as well. Output is ordered by line, then
/// column; each line is scanned once even if it is both added and in scope.
pub fn identifiers_for_file(
    text: &str,
    added: &BTreeSet<u32>,
    scope: IdentifierScope,
) -> Vec<Identifier> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Ok(n) = u32::try_from(idx) else {
            break;
        };
        let selected = match scope {
            IdentifierScope::AddedLines => added.contains(&n),
            IdentifierScope::FullFile => true,
        };
        if selected {
            out.extend(extract_identifiers(line, n));
        }
    }
    out
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}
