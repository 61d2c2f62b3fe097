//! Sentence-aware text segmentation
//!
//! The synthesis API caps request length, so long messages are cut into
//! chunks. Cuts prefer sentence ends; a sentence longer than the limit is
//! split at character boundaries. Concatenating the chunks always gives back
//! the input unchanged.

/// Characters that end a sentence
///
/// Full-width Japanese punctuation first, then the ASCII equivalents.
pub const SENTENCE_TERMINATORS: &[char] = &['。', '．', '！', '？', '!', '?', '.', '\n'];

/// One chunk of a message, in playback order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechChunk {
    pub text: String,
    pub sequence_index: usize,
}

/// Split text into sentences, each keeping its terminator
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            let end = idx + ch.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        out.push(&text[start..]);
    }

    out
}

/// Split `text` into chunks of at most `max_chars` characters
///
/// Lengths are counted in Unicode scalar values. A `max_chars` of zero is
/// treated as one.
pub fn segment(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);

    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences(text) {
        let sentence_len = sentence.chars().count();

        if current_len + sentence_len <= max_chars {
            current.push_str(sentence);
            current_len += sentence_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if sentence_len <= max_chars {
            current.push_str(sentence);
            current_len = sentence_len;
            continue;
        }

        // Hard split; the tail keeps accumulating with following sentences
        let mut rest = sentence;
        while rest.chars().count() > max_chars {
            let cut = rest
                .char_indices()
                .nth(max_chars)
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            chunks.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        current.push_str(rest);
        current_len = rest.chars().count();
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// [`segment`] with sequence indices attached
pub fn segment_chunks(text: &str, max_chars: usize) -> Vec<SpeechChunk> {
    segment(text, max_chars)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| SpeechChunk {
            text,
            sequence_index,
        })
        .collect()
}
