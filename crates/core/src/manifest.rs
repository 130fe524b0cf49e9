//! Manifest-number rules shared by the code decoder and the text extractor.

/// Literal prefix every manifest number starts with.
pub const MANIFEST_PREFIX: &str = "6100";
/// Total length of a manifest number.
pub const MANIFEST_LEN: usize = 10;

/// `true` iff `s` is exactly `6100` followed by six ASCII digits.
pub fn is_valid_manifest_number(s: &str) -> bool {
    s.len() == MANIFEST_LEN
        && s.starts_with(MANIFEST_PREFIX)
        && s.bytes().all(|b| b.is_ascii_digit())
}

/// Keep only the digits of `s`, find the first `6100` and return the ten
/// characters starting there if they form a valid manifest number.
///
/// Nothing is coerced: a short or malformed tail is a rejection.
pub fn manifest_from_digits(s: &str) -> Option<String> {
    let digits: String = s.chars().filter(char::is_ascii_digit).collect();
    let start = digits.find(MANIFEST_PREFIX)?;
    let candidate = digits.get(start..start + MANIFEST_LEN)?;
    is_valid_manifest_number(candidate).then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_pattern() {
        assert!(is_valid_manifest_number("6100123456"));
        assert!(is_valid_manifest_number("6100000000"));
    }

    #[test]
    fn rejects_everything_else() {
        for s in [
            "",
            "6100",
            "610012345",
            "61001234567",
            "6200123456",
            "61001234a6",
            " 6100123456",
            "6100１23456",
        ] {
            assert!(!is_valid_manifest_number(s), "{s:?} should be rejected");
        }
    }

    #[test]
    fn digits_are_pulled_out_of_noise() {
        assert_eq!(
            manifest_from_digits("MS# 6100-123-456").as_deref(),
            Some("6100123456")
        );
        assert_eq!(
            manifest_from_digits("(00)99 6100123456 X").as_deref(),
            Some("6100123456")
        );
    }

    #[test]
    fn short_tail_is_rejected_not_padded() {
        assert_eq!(manifest_from_digits("610012"), None);
        assert_eq!(manifest_from_digits("no digits"), None);
    }
}
