//! Domain name, IP address, name server, and DS record validation.
//!
//! These are the building blocks of every inbound test request. Validation
//! returns stable, client-facing messages; normalization (lowercasing,
//! trailing-dot stripping, list ordering) lives in [`crate::params`].

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum length of a full domain name, including separators.
pub const MAX_DOMAIN_LENGTH: usize = 254;

/// Maximum length of a single label after A-label conversion.
pub const MAX_LABEL_LENGTH: usize = 63;

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.\-@]{1,50}$").expect("static regex is valid"));

static API_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,512}$").expect("static regex is valid"));

static PROFILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9_\-]{0,29}[a-z0-9])?$").expect("static regex is valid")
});

static CLIENT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 .:_+~\-]{1,50}$").expect("static regex is valid"));

/// Why a domain name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainNameError {
    TooLong,
    LabelTooLong,
    InvalidCharacters,
    Idna,
}

impl DomainNameError {
    /// Client-facing message for this rejection.
    pub const fn message(self) -> &'static str {
        match self {
            Self::TooLong => "The domain name is too long",
            Self::LabelTooLong => "The domain name label is too long",
            Self::InvalidCharacters => "The domain name character(s) are not supported",
            Self::Idna => "The domain name cannot be converted to an A-label",
        }
    }
}

/// Validate a domain name and return its A-label (ASCII) form.
///
/// The root zone `"."` is accepted as-is. Non-ASCII names go through IDNA;
/// the character set after conversion is restricted to `[A-Za-z0-9.\-_]`
/// and every label must fit in [`MAX_LABEL_LENGTH`] octets.
pub fn validate_domain(raw: &str) -> Result<String, DomainNameError> {
    if raw == "." {
        return Ok(raw.to_string());
    }
    if raw.is_empty() {
        return Err(DomainNameError::InvalidCharacters);
    }
    if raw.chars().count() > MAX_DOMAIN_LENGTH {
        return Err(DomainNameError::TooLong);
    }

    let ascii = if raw.is_ascii() {
        raw.to_string()
    } else {
        idna::domain_to_ascii(raw).map_err(|_| DomainNameError::Idna)?
    };

    if ascii.len() > MAX_DOMAIN_LENGTH {
        return Err(DomainNameError::TooLong);
    }
    if !ascii
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(DomainNameError::InvalidCharacters);
    }

    let unrooted = ascii.strip_suffix('.').unwrap_or(&ascii);
    for label in unrooted.split('.') {
        if label.is_empty() {
            return Err(DomainNameError::InvalidCharacters);
        }
        if label.len() > MAX_LABEL_LENGTH {
            return Err(DomainNameError::LabelTooLong);
        }
    }

    Ok(ascii)
}

/// Lowercase and strip the trailing dot, except for the root zone itself.
pub fn normalize_domain(validated: &str) -> String {
    if validated == "." {
        return validated.to_string();
    }
    let lower = validated.to_ascii_lowercase();
    match lower.strip_suffix('.') {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// Parse an IP address in IPv4 dotted-decimal or IPv6 textual form,
/// returning its canonical rendering.
pub fn canonical_ip(raw: &str) -> Option<String> {
    if let Ok(v4) = raw.parse::<Ipv4Addr>() {
        return Some(v4.to_string());
    }
    if let Ok(v6) = raw.parse::<Ipv6Addr>() {
        return Some(v6.to_string());
    }
    None
}

/// A name server entry: a server name with an optional glue address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nameserver {
    pub ns: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A DS record as submitted for undelegated testing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DsInfo {
    pub keytag: u16,
    pub algorithm: u8,
    pub digtype: u8,
    pub digest: String,
}

impl DsInfo {
    /// Canonical ordering key: `(keytag, algorithm, digtype, digest)`.
    pub fn sort_key(&self) -> (u16, u8, u8, String) {
        (
            self.keytag,
            self.algorithm,
            self.digtype,
            self.digest.to_ascii_lowercase(),
        )
    }
}

/// Validate a DS digest: hex, exactly 40, 64, or 96 characters.
pub fn valid_ds_digest(digest: &str) -> bool {
    matches!(digest.len(), 40 | 64 | 96) && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a batch/API username.
pub fn valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

/// Validate an API key.
pub fn valid_api_key(api_key: &str) -> bool {
    API_KEY_RE.is_match(api_key)
}

/// Validate a profile name, returning its lowercased form.
///
/// The pattern is case-insensitive; storage and lookup always use the
/// lowercase rendering.
pub fn valid_profile_name(name: &str) -> Option<String> {
    let lower = name.to_ascii_lowercase();
    PROFILE_RE.is_match(&lower).then_some(lower)
}

/// Validate a client id / client version tag.
pub fn valid_client_tag(tag: &str) -> bool {
    CLIENT_TAG_RE.is_match(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ascii_domain() {
        assert_eq!(validate_domain("example.com").unwrap(), "example.com");
        assert_eq!(validate_domain("Example.COM.").unwrap(), "Example.COM.");
    }

    #[test]
    fn accepts_root_zone() {
        assert_eq!(validate_domain(".").unwrap(), ".");
        assert_eq!(normalize_domain("."), ".");
    }

    #[test]
    fn rejects_embedded_space() {
        assert_eq!(
            validate_domain("ex ample.com"),
            Err(DomainNameError::InvalidCharacters)
        );
        assert_eq!(
            DomainNameError::InvalidCharacters.message(),
            "The domain name character(s) are not supported"
        );
    }

    #[test]
    fn rejects_overlong_name_and_label() {
        let long = "a".repeat(255);
        assert_eq!(validate_domain(&long), Err(DomainNameError::TooLong));

        let label = format!("{}.com", "b".repeat(64));
        assert_eq!(validate_domain(&label), Err(DomainNameError::LabelTooLong));
    }

    #[test]
    fn rejects_empty_label() {
        assert_eq!(
            validate_domain("foo..com"),
            Err(DomainNameError::InvalidCharacters)
        );
    }

    #[test]
    fn converts_idn_to_a_label() {
        let ascii = validate_domain("café.example").unwrap();
        assert_eq!(ascii, "xn--caf-dma.example");
    }

    #[test]
    fn normalizes_case_and_trailing_dot() {
        assert_eq!(normalize_domain("Example.COM."), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
    }

    #[test]
    fn canonicalizes_ip_addresses() {
        assert_eq!(canonical_ip("192.0.2.1").unwrap(), "192.0.2.1");
        assert_eq!(
            canonical_ip("2001:DB8:0:0:0:0:0:1").unwrap(),
            "2001:db8::1"
        );
        assert!(canonical_ip("not-an-ip").is_none());
        assert!(canonical_ip("300.1.1.1").is_none());
    }

    #[test]
    fn ds_digest_lengths() {
        assert!(valid_ds_digest(&"a".repeat(40)));
        assert!(valid_ds_digest(&"0".repeat(64)));
        assert!(valid_ds_digest(&"F".repeat(96)));
        assert!(!valid_ds_digest(&"a".repeat(41)));
        assert!(!valid_ds_digest(&"g".repeat(40)));
    }

    #[test]
    fn username_and_api_key_patterns() {
        assert!(valid_username("alice@example.com"));
        assert!(valid_username("a.b-c"));
        assert!(!valid_username(""));
        assert!(!valid_username("has space"));
        assert!(!valid_username(&"x".repeat(51)));

        assert!(valid_api_key("secret_key-1"));
        assert!(!valid_api_key("no spaces allowed"));
        assert!(valid_api_key(&"k".repeat(512)));
        assert!(!valid_api_key(&"k".repeat(513)));
    }

    #[test]
    fn profile_name_pattern() {
        assert_eq!(valid_profile_name("Default").unwrap(), "default");
        assert_eq!(valid_profile_name("p1").unwrap(), "p1");
        assert_eq!(valid_profile_name("a").unwrap(), "a");
        assert!(valid_profile_name("-bad").is_none());
        assert!(valid_profile_name("bad-").is_none());
        assert!(valid_profile_name(&"p".repeat(32)).is_none());
        assert!(valid_profile_name(&"p".repeat(31)).is_some());
    }
}
