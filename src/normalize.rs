//! String normalization for matching keys.
//!
//! Creator names and titles are compared as normalized strings. The same
//! normalization is applied when a key is written to the title index and when
//! it is looked up, so any change here changes cluster identity.

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref TRAILING_CONNECTOR: Regex = Regex::new(r"\s*[/:;,=.]$").expect("valid regex");
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").expect("valid regex");
    static ref DIGITS: Regex = Regex::new(r"\d").expect("valid regex");
    static ref NUMBER: Regex = Regex::new(r"\d+").expect("valid regex");
}

/// Normalize a name or title for indexing.
///
/// Every character that is not a letter or digit becomes a space, runs of
/// whitespace collapse to one space, the result is trimmed and uppercased.
/// Input is composed to NFC first so decomposed diacritics count as letters.
///
/// # Examples
///
/// ```
/// use frbrizer::normalize::prepare_name_for_indexing;
///
/// assert_eq!(prepare_name_for_indexing("Gombrowicz, Witold"), "GOMBROWICZ WITOLD");
/// assert_eq!(prepare_name_for_indexing("  Żółw -- i   kot. "), "ŻÓŁW I KOT");
/// ```
#[must_use]
pub fn prepare_name_for_indexing(value: &str) -> String {
    let replaced: String = value
        .nfc()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    WHITESPACE_RUN
        .replace_all(replaced.trim(), " ")
        .to_uppercase()
}

/// Strip surrounding whitespace and one trailing ISBD connector (`/:;,=.`).
///
/// ```
/// use frbrizer::normalize::normalize_title;
///
/// assert_eq!(normalize_title(" Ferdydurke / "), "Ferdydurke");
/// assert_eq!(normalize_title("Trans-Atlantyk ;"), "Trans-Atlantyk");
/// ```
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    TRAILING_CONNECTOR.replace(trimmed, "").into_owned()
}

/// Full title key: ISBD cleanup followed by indexing normalization.
#[must_use]
pub fn title_key(title: &str) -> String {
    prepare_name_for_indexing(&normalize_title(title))
}

/// Drop `offset` leading characters (non-filing article) from a title.
///
/// Returns `None` when the offset is zero or would consume the whole title.
#[must_use]
pub fn strip_non_filing(title: &str, offset: usize) -> Option<String> {
    if offset == 0 {
        return None;
    }
    let rest: String = title.chars().skip(offset).collect();
    if rest.trim().is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// First `len` characters of a string.
#[must_use]
pub fn truncate_chars(value: &str, len: usize) -> String {
    value.chars().take(len).collect()
}

/// Characters `start..end` of a string, clamped to its length.
#[must_use]
pub fn char_slice(value: &str, start: usize, end: usize) -> String {
    value
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}

/// Last `len` characters of a string.
#[must_use]
pub fn last_chars(value: &str, len: usize) -> String {
    let count = value.chars().count();
    value.chars().skip(count.saturating_sub(len)).collect()
}

/// All decimal digits of a string, concatenated.
#[must_use]
pub fn digits_of(value: &str) -> String {
    DIGITS.find_iter(value).map(|m| m.as_str()).collect()
}

/// Largest integer appearing in a string (e.g. page count from "XII, 345 s.").
#[must_use]
pub fn max_number(value: &str) -> Option<u32> {
    NUMBER
        .find_iter(value)
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .max()
}

/// First integer appearing in a string (e.g. height from "24 cm").
#[must_use]
pub fn first_number(value: &str) -> Option<u32> {
    NUMBER
        .find_iter(value)
        .find_map(|m| m.as_str().parse::<u32>().ok())
}

/// Normalize an edition statement for equality: brackets, punctuation and
/// whitespace are removed and the rest uppercased.
///
/// ```
/// use frbrizer::normalize::normalize_edition;
///
/// assert_eq!(normalize_edition("Wyd. 2, [popr.]"), normalize_edition("wyd 2 popr"));
/// ```
#[must_use]
pub fn normalize_edition(edition: &str) -> String {
    edition
        .nfc()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_title_only_one_connector() {
        assert_eq!(normalize_title("Title :"), "Title");
        assert_eq!(normalize_title("Title. /"), "Title.");
        assert_eq!(normalize_title("Title"), "Title");
    }

    #[test]
    fn test_title_key() {
        assert_eq!(title_key("Ferdydurke /"), "FERDYDURKE");
        assert_eq!(title_key("The  old man and the sea :"), "THE OLD MAN AND THE SEA");
    }

    #[test]
    fn test_strip_non_filing() {
        assert_eq!(
            strip_non_filing("The Castle", 4),
            Some("Castle".to_string())
        );
        assert_eq!(strip_non_filing("The Castle", 0), None);
        assert_eq!(strip_non_filing("Abc", 3), None);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(max_number("XII, 345 s., [8] s. tabl."), Some(345));
        assert_eq!(first_number("24 cm"), Some(24));
        assert_eq!(first_number("cm"), None);
        assert_eq!(digits_of("Tom 2, część 13"), "213");
    }

    #[test]
    fn test_char_helpers_are_char_safe() {
        assert_eq!(truncate_chars("Żółć", 2), "Żó");
        assert_eq!(last_chars("Żółć", 2), "łć");
        assert_eq!(char_slice("abcdef", 2, 4), "cd");
        assert_eq!(char_slice("ab", 1, 10), "b");
    }

    proptest! {
        #[test]
        fn prop_prepare_name_is_idempotent(s in "[a-zA-Z0-9ąćęłńóśźżĄĆĘŁŃÓŚŹŻ ,.;:/=-]{0,40}") {
            let once = prepare_name_for_indexing(&s);
            prop_assert_eq!(prepare_name_for_indexing(&once), once.clone());
            prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        }
    }
}
