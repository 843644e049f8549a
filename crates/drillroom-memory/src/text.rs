/// Canonical form used for every duplicate comparison: lowercase ASCII
/// alphanumerics separated by single spaces.
pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower.is_whitespace() {
                lower
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_case() {
        assert_eq!(
            normalize_text("  What's the ROLLBACK   trigger?!"),
            "what s the rollback trigger"
        );
    }

    #[test]
    fn non_ascii_becomes_separator() {
        assert_eq!(normalize_text("café—ok"), "caf ok");
        assert_eq!(normalize_text("..."), "");
    }
}
