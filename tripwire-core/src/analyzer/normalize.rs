//! Token text normalization applied before rule matching.

/// Lowercase, strip zero-width characters, collapse runs of whitespace to a
/// single space, and trim. Zero-width stripping defeats the classic
/// `r​m -rf` obfuscation where a joiner is spliced into a command word.
pub fn normalize_text(input: &str) -> String {
    let lowered = input.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases() {
        assert_eq!(normalize_text("Sudo RM"), "sudo rm");
    }

    #[test]
    fn test_strips_zero_width_characters() {
        assert_eq!(normalize_text("r\u{200B}m -r\u{FEFF}f"), "rm -rf");
        assert_eq!(normalize_text("a\u{200C}b\u{200D}c"), "abc");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_text("  rm \t -rf \n / "), "rm -rf /");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text("   \t\n"), "");
    }
}
