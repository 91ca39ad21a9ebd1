//! Fingerprint and test id derivation.
//!
//! The fingerprint is a 64-bit hash over the semantically significant subset
//! of a normalized request: domain, transport flags, profile, name servers,
//! and DS records. Client identification, priority, queue, and language do
//! not participate. The fingerprint is the dedup key inside the reuse
//! window.
//!
//! The test id is the 16-character lowercase hex rendering of a second
//! 64-bit hash, taken over the same canonical form plus the creation-time
//! epoch seconds. Two submissions of one fingerprint in the same second
//! produce the same test id and are collapsed by the unique index on it;
//! a later resubmission gets a fresh id.

use md5::{Digest, Md5};
use serde::Serialize;

use crate::domain::{DsInfo, Nameserver};
use crate::params::TestParams;

/// The fingerprinted subset, serialized with sorted keys and no whitespace.
#[derive(Serialize)]
struct CanonicalSubset<'a> {
    domain: &'a str,
    ipv4: bool,
    ipv6: bool,
    profile: &'a str,
    #[serde(skip_serializing_if = "<[Nameserver]>::is_empty")]
    nameservers: &'a [Nameserver],
    #[serde(skip_serializing_if = "<[DsInfo]>::is_empty")]
    ds_info: &'a [DsInfo],
}

/// Serialize the fingerprinted subset of normalized params.
///
/// `serde_json` maps are ordered, so key order is deterministic; compact
/// output carries no whitespace. Callers must pass normalized params
/// ([`TestParams::normalize`]) or permuted lists will hash apart.
pub fn canonical_json(params: &TestParams) -> String {
    let subset = CanonicalSubset {
        domain: &params.domain,
        ipv4: params.ipv4,
        ipv6: params.ipv6,
        profile: &params.profile,
        nameservers: &params.nameservers,
        ds_info: &params.ds_info,
    };
    // Route through `Value` so keys come out sorted: `serde_json::Map` is
    // BTreeMap-backed. A struct of strings, bools, and vecs cannot fail to
    // serialize.
    serde_json::to_value(&subset).unwrap_or_default().to_string()
}

fn digest64(input: &[u8]) -> u64 {
    let digest = Md5::digest(input);
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// The 64-bit dedup fingerprint of a normalized request.
#[allow(clippy::cast_possible_wrap)]
pub fn fingerprint(canonical: &str) -> i64 {
    digest64(canonical.as_bytes()) as u64 as i64
}

/// The test id for a request created at `creation_time` (epoch seconds).
pub fn test_id(canonical: &str, creation_time: i64) -> String {
    let mut input = Vec::with_capacity(canonical.len() + 24);
    input.extend_from_slice(canonical.as_bytes());
    input.push(b'@');
    input.extend_from_slice(creation_time.to_string().as_bytes());

    let bits = digest64(&input);
    format!("{bits:016x}")
}
