//! Small text helpers shared across the crate.

/// Characters stripped from element and variable names.
const FORBIDDEN: &[char] = &[
    '*', '.', '"', '/', '\\', '[', ']', ':', ';', '|', ',', ' ',
];

/// Returns `text` with forbidden characters removed and surrounding
/// whitespace trimmed.
///
/// Element names become dot-separated address segments, so dots and
/// other separator-like characters cannot appear in them.
pub fn clean_name(text: &str) -> String {
    text.chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Returns `text` framed by underline rules, for emphasized console output.
pub fn emphasize(text: &str) -> String {
    let rule = "-".repeat(text.chars().count());
    format!("{rule}\n{text}\n{rule}")
}
