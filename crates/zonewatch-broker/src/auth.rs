//! API key comparison.

use subtle::ConstantTimeEq;

/// Constant-time string comparison.
///
/// Compares byte-by-byte using `subtle::ConstantTimeEq` so that api-key
/// verification does not leak how much of a key matched. Length mismatch
/// returns early; key length is not treated as secret.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings() {
        assert!(constant_time_str_eq("hello", "hello"));
        assert!(constant_time_str_eq("", ""));
    }

    #[test]
    fn different_lengths() {
        assert!(!constant_time_str_eq("short", "longer_string"));
    }

    #[test]
    fn same_length_different_content() {
        assert!(!constant_time_str_eq("secret-a", "secret-b"));
    }
}
