//! Normalized spellings of a part number.
//!
//! Catalogs disagree about leading zeros and separator punctuation, so we
//! store every plausible spelling and let exact-match lookups find any of
//! them.

/// Separator characters dropped by the punctuation-free variant.
const SEPARATORS: &[char] = &['-', '.', '/', '_'];

/// Expand a part number into its lookup variants.
///
/// The input itself always comes first. After that, in order:
///
/// 1. the input without leading zeros, if it starts with `0`;
/// 2. the input without any of `- . / _`, if it contains one;
/// 3. that punctuation-free value without leading zeros, if it starts with `0`.
///
/// A variant is only added if it is non-empty and differs from every variant
/// produced so far.
pub fn expand_variants(part_number: &str) -> Vec<String> {
    let mut variants = vec![part_number.to_owned()];
    let mut push = |candidate: &str| {
        if !candidate.is_empty() && !variants.iter().any(|v| v == candidate) {
            variants.push(candidate.to_owned());
        }
    };

    if part_number.starts_with('0') {
        push(part_number.trim_start_matches('0'));
    }

    if part_number.contains(SEPARATORS) {
        let cleaned = part_number.replace(SEPARATORS, "");
        push(&cleaned);
        if cleaned.starts_with('0') {
            push(cleaned.trim_start_matches('0'));
        }
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_zeros() {
        assert_eq!(expand_variants("007788"), vec!["007788", "7788"]);
    }

    #[test]
    fn strips_punctuation() {
        assert_eq!(expand_variants("AB-12.34"), vec!["AB-12.34", "AB1234"]);
        assert_eq!(expand_variants("A/B_C"), vec!["A/B_C", "ABC"]);
    }

    #[test]
    fn leading_zero_then_letter_is_still_stripped() {
        assert_eq!(
            expand_variants("0AB-12"),
            vec!["0AB-12", "AB-12", "0AB12", "AB12"]
        );
    }

    #[test]
    fn combines_both_rules() {
        assert_eq!(
            expand_variants("0099-A"),
            vec!["0099-A", "99-A", "0099A", "99A"]
        );
    }

    #[test]
    fn punctuation_before_zeros() {
        // Removing the separator exposes leading zeros that rule 1 never saw.
        assert_eq!(expand_variants("-0012"), vec!["-0012", "0012", "12"]);
    }

    #[test]
    fn all_zeros_keeps_only_nonempty_variants() {
        assert_eq!(expand_variants("0000"), vec!["0000"]);
        assert_eq!(expand_variants("00-00"), vec!["00-00", "-00", "0000"]);
    }

    #[test]
    fn plain_numbers_are_unchanged() {
        assert_eq!(expand_variants("AB1234"), vec!["AB1234"]);
    }

    #[test]
    fn input_first_and_no_duplicates() {
        for input in ["0.0.1", "00/00/12", "0-0", "X", "0_A_0", "1234-", "./-_"] {
            let variants = expand_variants(input);
            assert_eq!(variants[0], input);
            let mut unique = variants.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), variants.len(), "{variants:?}");
        }
    }
}
