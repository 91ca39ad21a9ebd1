//! The test request parameter object.
//!
//! A [`TestParams`] is the normalized form of a `start_domain_test`
//! submission. It is what gets persisted, fingerprinted, and handed back to
//! clients by `get_test_params` — canonical list ordering, lowercased
//! domain and profile, A-label domains.

use serde::{Deserialize, Serialize};

use crate::domain::{self, DsInfo, Nameserver};

/// Default priority for direct submissions.
pub const DEFAULT_PRIORITY: i64 = 10;

/// Default priority for batch submissions.
pub const DEFAULT_BATCH_PRIORITY: i64 = 5;

/// Default queue tag.
pub const DEFAULT_QUEUE: i64 = 0;

/// Normalized parameters of one test request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestParams {
    pub domain: String,
    pub ipv4: bool,
    pub ipv6: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<Nameserver>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ds_info: Vec<DsInfo>,
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    pub priority: i64,
    pub queue: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl TestParams {
    /// Canonicalize the parameter object in place.
    ///
    /// Lowercases the domain and profile, strips the trailing dot (root
    /// excepted), canonicalizes glue addresses and DS digests, and sorts
    /// both lists so that permuted submissions compare equal.
    pub fn normalize(&mut self) {
        self.domain = domain::normalize_domain(&self.domain);
        self.profile = self.profile.to_ascii_lowercase();

        for ns in &mut self.nameservers {
            ns.ns = domain::normalize_domain(&ns.ns);
            if let Some(ip) = &ns.ip {
                if let Some(canonical) = domain::canonical_ip(ip) {
                    ns.ip = Some(canonical);
                }
            }
        }
        self.nameservers
            .sort_by(|a, b| (&a.ns, &a.ip).cmp(&(&b.ns, &b.ip)));

        for ds in &mut self.ds_info {
            ds.digest = ds.digest.to_ascii_lowercase();
        }
        self.ds_info.sort_by_key(DsInfo::sort_key);
    }

    /// A request is undelegated when it pins name servers or DS records.
    pub fn undelegated(&self) -> bool {
        !self.nameservers.is_empty() || !self.ds_info.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TestParams {
        TestParams {
            domain: "Example.COM.".to_string(),
            ipv4: true,
            ipv6: true,
            nameservers: vec![
                Nameserver {
                    ns: "NS2.example.com".to_string(),
                    ip: None,
                },
                Nameserver {
                    ns: "ns1.example.com".to_string(),
                    ip: Some("2001:DB8::1".to_string()),
                },
            ],
            ds_info: vec![],
            profile: "Default".to_string(),
            client_id: None,
            client_version: None,
            priority: DEFAULT_PRIORITY,
            queue: DEFAULT_QUEUE,
            language: None,
        }
    }

    #[test]
    fn normalize_lowercases_and_sorts() {
        let mut params = sample();
        params.normalize();

        assert_eq!(params.domain, "example.com");
        assert_eq!(params.profile, "default");
        assert_eq!(params.nameservers[0].ns, "ns1.example.com");
        assert_eq!(params.nameservers[0].ip.as_deref(), Some("2001:db8::1"));
        assert_eq!(params.nameservers[1].ns, "ns2.example.com");
    }

    #[test]
    fn undelegated_tracks_list_contents() {
        let mut params = sample();
        assert!(params.undelegated());

        params.nameservers.clear();
        assert!(!params.undelegated());

        params.ds_info.push(DsInfo {
            keytag: 1,
            algorithm: 8,
            digtype: 2,
            digest: "a".repeat(64),
        });
        assert!(params.undelegated());
    }
}
