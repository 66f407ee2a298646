//! Content fingerprints used to recognise the same question across uploads.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 32;

/// Lower-cases a field and collapses every whitespace run to a single space.
fn normalize_field(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic fingerprint of a question's text and options.
///
/// Casing and surrounding or repeated whitespace do not affect the result, so
/// `"Foo?"` with `["A", "B", "C", "D"]` hashes the same as `" foo? "` with
/// `["a", "B", "c", "D "]`.
pub fn fingerprint<S: AsRef<str>>(text: &str, options: &[S]) -> String {
    let mut content = normalize_field(text);
    for option in options {
        content.push('|');
        content.push_str(&normalize_field(option.as_ref()));
    }

    let digest = Sha256::digest(content.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_case_and_surrounding_whitespace() {
        let a = fingerprint("Foo?", &["A", "B", "C", "D"]);
        let b = fingerprint(" foo? ", &["a", "B", "c", "D "]);
        assert_eq!(a, b);
    }

    #[test]
    fn collapses_inner_whitespace() {
        let a = fingerprint("When is a  goal\tscored?", &["a", "b", "c", "d"]);
        let b = fingerprint("when is a goal scored?", &["a", "b", "c", "d"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_options_change_the_fingerprint() {
        let a = fingerprint("Foo?", &["A", "B", "C", "D"]);
        let b = fingerprint("Foo?", &["A", "B", "C", "E"]);
        assert_ne!(a, b);
    }

    #[test]
    fn option_boundaries_matter() {
        let a = fingerprint("q", &["ab", "c", "d", "e"]);
        let b = fingerprint("q", &["a", "bc", "d", "e"]);
        assert_ne!(a, b);
    }

    #[test]
    fn produces_fixed_length_hex() {
        let hash = fingerprint("Foo?", &["A", "B", "C", "D"]);
        assert_eq!(hash.len(), FINGERPRINT_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
