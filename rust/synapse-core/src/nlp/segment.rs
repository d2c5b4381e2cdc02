//! Sentence segmentation.
//!
//! Turns raw extracted text into an ordered list of clean sentences in four
//! passes:
//!
//! 1. **Line merge**: newline-separated lines are soft-wrapped back together
//!    unless the accumulated line is short enough to be a title or heading,
//!    in which case it becomes a standalone block.
//! 2. **Terminal split**: blocks are split at sentence-terminating
//!    punctuation followed by whitespace (covers Latin `.!?` and the Korean
//!    `다.` / `요.` endings, plus fullwidth forms).
//! 3. **List-marker split**: fragments are further split before markers of
//!    the form `1. `, `a. `, `가. `, and the marker itself is stripped.
//! 4. **Filter**: fragments without at least two alphanumeric/CJK
//!    characters are dropped.
//!
//! Re-segmenting the newline-join of the output yields the same sequence,
//! and document order is always preserved.

use regex::Regex;
use std::sync::OnceLock;

/// Single-character list marker followed by a dot and whitespace, at the
/// start of a fragment or after whitespace.
fn list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)[0-9A-Za-z\p{Hangul}]\.\s+").unwrap())
}

/// Split raw text into clean sentences, preserving document order.
#[must_use]
pub fn split_sentences(text: &str, short_line_max_chars: usize) -> Vec<String> {
    merge_lines(text, short_line_max_chars)
        .iter()
        .flat_map(|block| split_at_terminals(block))
        .flat_map(|fragment| split_list_markers(&fragment))
        .map(|fragment| fragment.trim().to_string())
        .filter(|fragment| is_substantial(fragment))
        .collect()
}

/// Soft-wrap lines into blocks. A short accumulated line is emitted on its
/// own (titles and headings); a long one absorbs the next line with a space.
fn merge_lines(text: &str, short_max: usize) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();

    for raw_line in text.split('\n') {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if current.is_empty() {
            current = line.to_string();
        } else if current.chars().count() <= short_max {
            blocks.push(std::mem::take(&mut current));
            current = line.to_string();
        } else {
            current.push(' ');
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

/// Split a block at terminal punctuation followed by whitespace. The
/// punctuation stays with the left fragment.
fn split_at_terminals(block: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut chars = block.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if is_terminal(c) {
            let followed_by_space = chars.peek().is_some_and(|&(_, next)| next.is_whitespace());
            if followed_by_space {
                let end = idx + c.len_utf8();
                fragments.push(block[start..end].trim().to_string());
                start = end;
            }
        }
    }
    if start < block.len() {
        fragments.push(block[start..].trim().to_string());
    }
    fragments.retain(|f| !f.is_empty());
    fragments
}

/// Split a fragment before list markers and strip the markers.
fn split_list_markers(fragment: &str) -> Vec<String> {
    let re = list_marker_regex();
    let mut pieces = Vec::new();
    let mut start = 0;

    for m in re.find_iter(fragment) {
        if m.start() > start {
            pieces.push(fragment[start..m.start()].to_string());
        }
        start = m.end();
    }
    if start < fragment.len() {
        pieces.push(fragment[start..].to_string());
    }
    if pieces.is_empty() {
        pieces.push(fragment.to_string());
    }
    pieces
}

/// At least two characters overall and at least two alphanumeric/CJK
/// characters; everything else is noise (page numbers, stray bullets).
fn is_substantial(fragment: &str) -> bool {
    fragment.chars().count() > 1 && fragment.chars().filter(|c| c.is_alphanumeric()).count() > 1
}
