//! Name normalization applied before comparison

use unicode_normalization::UnicodeNormalization;

/// NFC, lower case, single spaces, trimmed.
pub fn normalize_name(name: &str) -> String {
    name.nfc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// NFC and trimmed, case preserved. Used for free text in outgoing messages.
pub fn normalize_text(text: &str) -> String {
    text.nfc().collect::<String>().trim().to_string()
}
