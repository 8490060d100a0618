//! Text cleaning, sentence-aware chunking, and content hashing.
//!
//! Everything here is pure: `clean` is idempotent and `chunk` is
//! deterministic, which is what makes hash-based dedup sound downstream.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};

use crate::config::CHUNK_SIZE_WORDS;
use crate::types::Blob;

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&[#\w]+;").expect("entity regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("blank-line regex"));
static SENTENCE_BOUNDARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("sentence regex"));

/// Strips HTML down to plain text.
///
/// Element text runs are joined with newlines, leftover entity escapes are
/// removed, runs of blank lines collapse to a single newline, and the result
/// is trimmed.
pub fn clean(raw_html: &str) -> String {
    let fragment = Html::parse_fragment(raw_html);
    let text = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join("\n");
    let text = ENTITY_RE.replace_all(&text, "");
    let text = BLANK_LINES_RE.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Splits text on sentence-ending punctuation followed by whitespace, keeping
/// the punctuation on the left half and dropping empty pieces.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut cursor = 0;
    for boundary in SENTENCE_BOUNDARY_RE.find_iter(text) {
        // The punctuation class is single-byte, so +1 lands on a char boundary.
        let end = boundary.start() + 1;
        let sentence = text[cursor..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        cursor = boundary.end();
    }
    let tail = text[cursor..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Chunks a blob's content with the default word target.
pub fn chunk(blob: &Blob) -> Vec<String> {
    chunk_with_target(blob, CHUNK_SIZE_WORDS)
}

/// Accumulates sentences into chunks of roughly `target` words.
///
/// When adding the next sentence would exceed the target and the current
/// chunk is non-empty, the chunk is emitted and the next one is seeded with
/// the previous chunk's last sentence as a one-sentence overlap. Chunks of a
/// titled blob are prefixed with `"Title: {title}\n\n"`.
pub fn chunk_with_target(blob: &Blob, target: usize) -> Vec<String> {
    let sentences = split_sentences(&blob.content);
    let title = (!blob.title.is_empty()).then_some(blob.title.as_str());

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut word_count = 0usize;

    for sentence in &sentences {
        let sentence_words = sentence.split_whitespace().count();

        if word_count + sentence_words > target {
            let overlap = current.last().copied();
            if let Some(overlap) = overlap {
                chunks.push(render_chunk(&current, title));
                current = vec![overlap];
                word_count = overlap.split_whitespace().count();
            }
        }

        current.push(sentence);
        word_count += sentence_words;
    }

    if !current.is_empty() {
        chunks.push(render_chunk(&current, title));
    }

    chunks
}

fn render_chunk(sentences: &[&str], title: Option<&str>) -> String {
    let body = sentences.join(" ");
    match title {
        Some(title) => format!("Title: {title}\n\n{body}"),
        None => body,
    }
}

/// 64-hex SHA-256 of `text`.
pub fn hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
