//! Splitting replies into chunks worth synthesizing separately
//!
//! Very short chunks make synthesis sound choppy, so sentences are merged
//! until a chunk reaches a minimum length.

/// Split `text` into speakable chunks of at least `min_chars` characters
///
/// Sentences end at `.`, `!` or `?` followed by whitespace. A short
/// leftover at the end is appended to the previous chunk rather than
/// spoken on its own. Every returned chunk is non-empty.
#[must_use]
pub fn split_into_speakable(text: &str, min_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_on_sentences(text) {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);

        if current.chars().count() >= min_chars {
            chunks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        match chunks.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(&current);
            }
            None => chunks.push(current),
        }
    }

    chunks
}

/// Split on sentence-ending punctuation followed by whitespace
fn split_on_sentences(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next_is_space = chars.peek().is_some_and(|(_, n)| n.is_whitespace());
        if matches!(c, '.' | '!' | '?') && next_is_space {
            let end = i + c.len_utf8();
            let seg = text[start..end].trim();
            if !seg.is_empty() {
                segments.push(seg);
            }
            start = end;
        }
    }

    // Trailing text
    let seg = text[start..].trim();
    if !seg.is_empty() {
        segments.push(seg);
    }

    segments
}
