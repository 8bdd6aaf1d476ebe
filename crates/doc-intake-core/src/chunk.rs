//! Paragraph-boundary text splitter used ahead of embedding.
//!
//! Text is cut on blank lines (`\n\n`) and paragraphs are packed greedily
//! into pieces of at most `max_tokens * 4` bytes. A paragraph that is
//! larger than a whole piece on its own is hard-split at the last newline
//! or space before the limit, never inside a UTF-8 sequence.
//!
//! ```rust
//! use doc_intake_core::chunk::split_text;
//!
//! let pieces = split_text("First.\n\nSecond.", 700);
//! assert_eq!(pieces, vec!["First.\n\nSecond.".to_string()]);
//! ```

use sha2::{Digest, Sha256};

/// Rough bytes-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into pieces that each fit in `max_tokens`.
///
/// Blank input yields no pieces.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let limit = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.len() > limit {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            pieces.extend(hard_split(para, limit));
            continue;
        }

        let sep = if buf.is_empty() { 0 } else { 2 };
        if buf.len() + sep + para.len() > limit {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }
    pieces
}

fn hard_split(mut rest: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    while !rest.is_empty() {
        let cut = if rest.len() <= limit {
            rest.len()
        } else {
            let hard = floor_char_boundary(rest, limit);
            let soft = rest[..hard]
                .rfind(['\n', ' '])
                .map(|pos| pos + 1)
                .unwrap_or(hard);
            if soft == 0 {
                // A single char wider than the limit still has to make progress.
                rest.chars().next().map(char::len_utf8).unwrap_or(rest.len())
            } else {
                soft
            }
        };
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Hex SHA-256 of a piece of text.
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
