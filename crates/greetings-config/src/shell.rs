//! Quoting for values spliced into `sh -c` scripts.

// Characters that change how `sh` reads a word.
const SHELL_META: &[char] = &[
    ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}', '<',
    '>', '|', '&', ';', '#', '~', '=',
];

/// Quote `value` so the shell reads it back as exactly one word.
///
/// Plain words are returned unchanged; anything else is single-quoted with
/// embedded `'` written as `'\''`.
pub fn quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if !value.contains(SHELL_META) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Quote each word and join them with spaces.
pub fn quote_words<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
