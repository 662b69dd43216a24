//! Filename sanitization for document references.
//!
//! Generated documents are stored under a directory named after the
//! document reference, so a reference has to be turned into a single path
//! component before it can be used to look an artifact up.

/// Characters that are never kept in a reference-derived filename.
const INVALID_CHARS: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '?', '*', '[', ']', ',', ';', '=', '\'',
];

/// Sanitize a document reference for use as a single path component.
///
/// Every control character and every character in [`INVALID_CHARS`] is
/// replaced by one underscore. Replacements are not collapsed, so two
/// distinct references never map to the same name because of a run of
/// separators. Surrounding whitespace is trimmed, and a leading dot is
/// replaced so the result can never name a hidden file or a parent
/// directory.
///
/// An empty or whitespace-only reference yields an empty string; callers
/// treat that as "no artifact".
///
/// ```
/// use notify_dispatch::utils::filename::sanitize_reference;
///
/// assert_eq!(sanitize_reference("PR2301-0001"), "PR2301-0001");
/// assert_eq!(sanitize_reference("(PROV12)/v2"), "(PROV12)_v2");
/// assert_eq!(sanitize_reference("  "), "");
/// ```
pub fn sanitize_reference(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut result: String = trimmed
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    if result.starts_with('.') {
        result.replace_range(0..1, "_");
    }

    result
}
