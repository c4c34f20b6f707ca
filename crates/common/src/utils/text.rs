//! Text helpers

/// Truncates `input` to at most `max_chars` characters.
///
/// Cuts on a character boundary, never inside a multi-byte sequence. Returns
/// the input unchanged when it already fits.
///
/// ```rust
/// use vigil_common::utils::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("ok", 10), "ok");
/// ```
#[must_use]
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => input[..byte_idx].to_string(),
        None => input.to_string(),
    }
}
