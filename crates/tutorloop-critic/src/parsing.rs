//! Helpers for pulling structured values out of free-form model replies.

use serde::de::DeserializeOwned;

/// Rating returned when a reward reply contains no usable 1–3 value
pub const DEFAULT_RATING: u8 = 2;

/// Deserialize the first JSON object found in `text`.
///
/// Tries, in order: a fenced code block, the whole text, and the span from the
/// first `{` to the last `}`.
pub fn extract_json_block<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Some(fenced) = fenced_block(text) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Some(value);
        }
    }

    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an optional language tag on the opening line
    let body_start = after_fence.find('\n').map(|p| p + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Extract a constructiveness rating on the 1–3 scale.
///
/// Takes the first standalone `1`, `2`, or `3`; anything else yields
/// [`DEFAULT_RATING`].
pub fn extract_rating(text: &str) -> u8 {
    let bytes = text.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if !(b'1'..=b'3').contains(&b) {
            continue;
        }
        let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
        let after_ok = i + 1 >= bytes.len() || !is_word_byte(bytes[i + 1]);
        if before_ok && after_ok {
            return b - b'0';
        }
    }
    DEFAULT_RATING
}

/// Map a 1–3 constructiveness rating onto the clarity scale.
///
/// A rating of 1 (nothing actionable left to say) is full clarity; a rating
/// of 3 (a sharp, specific critique) means the explanation still has work to do.
pub fn rating_to_clarity(rating: u8) -> f64 {
    let rating = rating.clamp(1, 3);
    f64::from(3 - rating) / 2.0
}

/// Letter label for a choice index: 0 → 'A', 1 → 'B', ...
pub fn choice_letter(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

/// Extract the multiple-choice answer from a student's reply.
///
/// Returns the zero-based choice index. Priority: explicit markers such as
/// `Answer: B`, a first line starting with `B)`, a parenthetical `(B)`, then
/// the last standalone capital letter in range.
pub fn extract_choice(text: &str, choice_count: usize) -> Option<usize> {
    let text = text.trim();
    if text.is_empty() || choice_count == 0 {
        return None;
    }
    let in_range = |c: char| {
        let upper = c.to_ascii_uppercase();
        upper.is_ascii_uppercase() && ((upper as u8 - b'A') as usize) < choice_count
    };
    let index_of = |c: char| (c.to_ascii_uppercase() as u8 - b'A') as usize;

    if let Some(c) = marked_choice(text, &in_range) {
        return Some(index_of(c));
    }

    if let Some(first_line) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
        let mut chars = first_line.chars();
        if let (Some(c), Some(sep)) = (chars.next(), chars.next()) {
            if c.is_ascii_uppercase() && in_range(c) && matches!(sep, ')' | '.' | '-') {
                return Some(index_of(c));
            }
        }
    }

    let chars: Vec<char> = text.chars().collect();
    for window in chars.windows(3) {
        if window[0] == '(' && window[2] == ')' && in_range(window[1]) {
            return Some(index_of(window[1]));
        }
    }

    let bytes = text.as_bytes();
    (0..bytes.len())
        .rev()
        .find(|&i| {
            let c = bytes[i] as char;
            c.is_ascii_uppercase()
                && in_range(c)
                && (i == 0 || !is_word_byte(bytes[i - 1]))
                && (i + 1 >= bytes.len() || !is_word_byte(bytes[i + 1]))
        })
        .map(|i| index_of(bytes[i] as char))
}

fn marked_choice(text: &str, in_range: &dyn Fn(char) -> bool) -> Option<char> {
    const MARKERS: [&str; 4] = ["final answer", "answer", "choice", "option"];

    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let bytes = text.as_bytes();

    for marker in MARKERS {
        let mut search_from = 0;
        while let Some(found) = lower[search_from..].find(marker) {
            let start = search_from + found;
            let mut pos = start + marker.len();
            search_from = pos;

            if start > 0 && is_word_byte(bytes[start - 1]) {
                continue;
            }
            while pos < bytes.len() && bytes[pos] == b' ' {
                pos += 1;
            }
            if pos < bytes.len() && matches!(bytes[pos], b':' | b'-') {
                pos += 1;
            }
            while pos < bytes.len() && bytes[pos] == b' ' {
                pos += 1;
            }
            if pos >= bytes.len() {
                continue;
            }
            let c = bytes[pos] as char;
            let boundary = pos + 1 >= bytes.len() || !is_word_byte(bytes[pos + 1]);
            if c.is_ascii_alphabetic() && boundary && in_range(c) {
                return Some(c.to_ascii_uppercase());
            }
        }
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Collapse all runs of whitespace into single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize whitespace and keep at most `word_cap` words
pub fn cap_words(text: &str, word_cap: usize) -> String {
    text.split_whitespace()
        .take(word_cap)
        .collect::<Vec<_>>()
        .join(" ")
}
