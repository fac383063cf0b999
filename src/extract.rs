//! Pull `(brand code, part number)` pairs out of a label's free-form text.
//!
//! A label lists brand codes, each followed by one or more part numbers. OCR
//! gives us that block as a single run of text, plus the brand codes on their
//! own from a separate column of the label. We use the known brand codes as
//! anchors and take whatever part-number-shaped token follows each one.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::prelude::*;

/// Part numbers shorter than this are treated as OCR noise.
pub const MIN_PART_NUMBER_LEN: usize = 4;

/// Characters allowed in a part number after the first one.
const PART_NUMBER_CLASS: &str = r"[a-zA-Z0-9\-./_]";

/// A brand code and one part number that followed it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExtractedPair {
    pub brand_code: String,
    pub part_number: String,
}

impl ExtractedPair {
    pub fn new(brand_code: impl Into<String>, part_number: impl Into<String>) -> Self {
        Self {
            brand_code: brand_code.into(),
            part_number: part_number.into(),
        }
    }
}

/// Uppercase, trim and deduplicate brand codes, keeping first-seen order.
pub fn normalize_brand_codes<S: AsRef<str>>(brand_codes: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    brand_codes
        .iter()
        .map(|code| code.as_ref().trim().to_uppercase())
        .filter(|code| !code.is_empty() && seen.insert(code.clone()))
        .collect()
}

/// Build the pattern matching `brand_code` followed by a part number.
fn brand_pattern(brand_code: &str) -> Result<Regex> {
    let pattern = format!(
        r"\b{}\s*([a-zA-Z0-9]{}+)",
        regex::escape(brand_code),
        PART_NUMBER_CLASS
    );
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("cannot build pattern for brand code {:?}", brand_code))
}

/// Extract `(brand code, part number)` pairs from `blended_text`.
///
/// Each brand code may match several times. Captures that are themselves a
/// known brand code, or shorter than [`MIN_PART_NUMBER_LEN`], are dropped.
/// Pairs come out grouped by brand code (in first-seen order), then in text
/// order.
pub fn extract_part_numbers<S: AsRef<str>>(
    brand_codes: &[S],
    blended_text: &str,
) -> Vec<ExtractedPair> {
    let brand_codes = normalize_brand_codes(brand_codes);
    if brand_codes.is_empty() || blended_text.trim().is_empty() {
        return vec![];
    }

    // Collapse newlines and whitespace runs so that a part number split across
    // OCR lines still follows its brand code.
    let text = blended_text.split_whitespace().collect::<Vec<_>>().join(" ");
    debug!(?brand_codes, text = %text, "Extracting part numbers");

    let mut pairs = vec![];
    for brand_code in &brand_codes {
        let pattern = match brand_pattern(brand_code) {
            Ok(pattern) => pattern,
            Err(err) => {
                // Escaped literals always compile, unless they blow the size
                // limit.
                warn!("Skipping brand code: {:?}", err);
                continue;
            }
        };
        for caps in pattern.captures_iter(&text) {
            let part_number = caps[1].to_uppercase();
            if brand_codes.contains(&part_number) {
                trace!(brand_code, part_number, "Capture is a brand code, skipping");
                continue;
            }
            if part_number.chars().count() < MIN_PART_NUMBER_LEN {
                trace!(brand_code, part_number, "Capture too short, skipping");
                continue;
            }
            pairs.push(ExtractedPair::new(brand_code.clone(), part_number));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<ExtractedPair> {
        list.iter()
            .map(|(b, p)| ExtractedPair::new(*b, *p))
            .collect()
    }

    #[test]
    fn extracts_one_pair_per_brand() {
        let result = extract_part_numbers(&["ACME", "ZED"], "ACME AB1234 foo ZED XY99 bar");
        assert_eq!(result, pairs(&[("ACME", "AB1234"), ("ZED", "XY99")]));
    }

    #[test]
    fn normalizes_brand_codes() {
        assert_eq!(
            normalize_brand_codes(&[" zed ", "ACME", "Zed", ""]),
            vec!["ZED".to_owned(), "ACME".to_owned()]
        );
    }

    #[test]
    fn empty_inputs_produce_nothing() {
        assert!(extract_part_numbers::<&str>(&[], "ACME AB1234").is_empty());
        assert!(extract_part_numbers(&["  "], "ACME AB1234").is_empty());
        assert!(extract_part_numbers(&["ACME"], "").is_empty());
    }

    #[test]
    fn matches_case_insensitively_and_uppercases() {
        let result = extract_part_numbers(&["acme"], "Acme ab-12.34/x_y");
        assert_eq!(result, pairs(&[("ACME", "AB-12.34/X_Y")]));
    }

    #[test]
    fn brand_may_match_several_times() {
        let result = extract_part_numbers(&["ZED"], "ZED 1111\nZED\t2222  ZED 3333");
        assert_eq!(
            result,
            pairs(&[("ZED", "1111"), ("ZED", "2222"), ("ZED", "3333")])
        );
    }

    #[test]
    fn part_number_may_touch_brand_code() {
        let result = extract_part_numbers(&["ZED"], "ZED0099-A");
        assert_eq!(result, pairs(&[("ZED", "0099-A")]));
    }

    #[test]
    fn rejects_adjacent_brand_codes() {
        // "ACME" followed directly by "BOSCH" must not produce ACME/BOSCH.
        let result = extract_part_numbers(&["ACME", "BOSCH"], "ACME BOSCH 0986");
        assert_eq!(result, pairs(&[("BOSCH", "0986")]));
    }

    #[test]
    fn rejects_short_captures() {
        let result = extract_part_numbers(&["ZED"], "ZED AB1 ZED ABC-1");
        assert_eq!(result, pairs(&[("ZED", "ABC-1")]));
    }

    #[test]
    fn capture_must_start_with_letter_or_digit() {
        let result = extract_part_numbers(&["ZED"], "ZED -1234 ZED _5678");
        assert!(result.is_empty());
    }

    #[test]
    fn brand_code_needs_left_boundary() {
        let result = extract_part_numbers(&["ZED"], "FOOZED 1234");
        assert!(result.is_empty());
    }

    #[test]
    fn escapes_regex_metacharacters() {
        let result = extract_part_numbers(&["A.B"], "AXB 1234 A.B 5678");
        assert_eq!(result, pairs(&[("A.B", "5678")]));
    }

    #[test]
    fn output_never_contains_brand_codes_or_short_numbers() {
        let brands = ["AB12", "CD", "EFGH"];
        let texts = [
            "AB12 CD EFGH AB12 EFGH CD 12 AB12 x",
            "CD AB12 CD efgh CD 1234-5 EFGH AB12",
            "ab12ab12 cd cd cdcd EFGH.1",
        ];
        let normalized = normalize_brand_codes(&brands);
        for text in texts {
            for pair in extract_part_numbers(&brands, text) {
                assert!(!normalized.contains(&pair.part_number), "{pair:?}");
                assert!(pair.part_number.len() >= MIN_PART_NUMBER_LEN, "{pair:?}");
            }
        }
    }

    #[test]
    fn repeated_extraction_is_stable() {
        let brands = ["ACME", "ZED", "acme"];
        let text = "ACME 1234 ZED 0099-A\nACME 5678";
        assert_eq!(
            extract_part_numbers(&brands, text),
            extract_part_numbers(&brands, text)
        );
    }
}
