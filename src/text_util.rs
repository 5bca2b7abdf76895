use std::collections::BTreeSet;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 240;

/// Split text into lowercase alphanumeric tokens, dropping one-character
/// tokens.
///
/// # Examples
///
/// ```
/// use docscope::text_util::tokenize;
///
/// assert_eq!(
///     tokenize("Rust's cargo-build, v2!"),
///     vec!["rust", "cargo", "build", "v2"]
/// );
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Distinct tokens of `text`, sorted.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Extract a snippet of `text` around the first line mentioning any of the
/// query tokens.
///
/// If nothing matches, the snippet is the start of the text. Whitespace
/// runs are collapsed so snippets print on one line. Returns an empty string
/// for empty text.
pub fn extract_snippet(text: &str, query: &str, max_chars: usize) -> String {
    let terms = token_set(query);
    let lines: Vec<&str> =
        text.lines().filter(|l| !l.trim().is_empty()).collect();

    let start = lines
        .iter()
        .position(|line| {
            tokenize(line).iter().any(|token| terms.contains(token))
        })
        .unwrap_or(0);

    let joined = lines[start.min(lines.len())..]
        .iter()
        .flat_map(|line| line.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");

    truncate_chars(&joined, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
