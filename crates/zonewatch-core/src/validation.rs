//! Request parameter validation.
//!
//! Every RPC method has a strict schema: unknown top-level properties are
//! rejected, and the documented boundary coercions apply before type checks
//! (integer-encoding strings become integers, fractional numbers round half
//! away from zero, and booleans treat `{false, null, "", "0", 0}` as false
//! and everything else as true — client compatibility depends on these).
//!
//! Failures come back as an ordered list of [`ParamError`], each carrying a
//! JSON Pointer into the offending params object and a client-facing
//! message.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::domain::{
    self, valid_api_key, valid_client_tag, valid_ds_digest, valid_profile_name, valid_username,
    DsInfo, Nameserver,
};
use crate::params::{TestParams, DEFAULT_BATCH_PRIORITY, DEFAULT_PRIORITY};

/// One validation failure: a JSON Pointer and a message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParamError {
    pub path: String,
    pub message: String,
}

impl ParamError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Coerce a JSON value to an integer under the boundary rules.
///
/// Integers pass through; fractional numbers round half away from zero;
/// strings encoding an integer are parsed. Everything else is rejected.
#[allow(clippy::cast_possible_truncation)]
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().map(|f| f.round() as i64)
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to a boolean under the boundary rules.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Number(n) => n.as_f64().is_none_or(|f| f != 0.0),
        _ => true,
    }
}

fn as_object<'a>(params: &'a Value, errors: &mut Vec<ParamError>) -> Option<&'a Map<String, Value>> {
    match params {
        Value::Object(map) => Some(map),
        _ => {
            errors.push(ParamError::new("", "Expected an object"));
            None
        }
    }
}

fn reject_unknown_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    prefix: &str,
    errors: &mut Vec<ParamError>,
) {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            errors.push(ParamError::new(
                format!("{prefix}/{key}"),
                "Unrecognized property",
            ));
        }
    }
}

fn string_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    prefix: &str,
    errors: &mut Vec<ParamError>,
) -> Option<&'a str> {
    match map.get(key) {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            errors.push(ParamError::new(format!("{prefix}/{key}"), "Must be a string"));
            None
        }
        None => None,
    }
}

fn required_string<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    errors: &mut Vec<ParamError>,
) -> Option<&'a str> {
    if map.contains_key(key) {
        string_field(map, key, "", errors)
    } else {
        errors.push(ParamError::new(format!("/{key}"), "Missing required property"));
        None
    }
}

fn validated_domain(raw: &str, path: &str, errors: &mut Vec<ParamError>) -> Option<String> {
    match domain::validate_domain(raw) {
        Ok(ascii) => Some(domain::normalize_domain(&ascii)),
        Err(e) => {
            errors.push(ParamError::new(path, e.message()));
            None
        }
    }
}

/// Methods without parameters accept a missing, null, or empty object.
pub fn parse_empty(params: Option<&Value>) -> Result<(), Vec<ParamError>> {
    match params {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(map)) if map.is_empty() => Ok(()),
        Some(Value::Object(map)) => {
            let mut errors = Vec::new();
            reject_unknown_keys(map, &[], "", &mut errors);
            Err(errors)
        }
        Some(_) => Err(vec![ParamError::new("", "Expected an object")]),
    }
}

const START_TEST_KEYS: &[&str] = &[
    "domain",
    "ipv4",
    "ipv6",
    "nameservers",
    "ds_info",
    "profile",
    "client_id",
    "client_version",
    "priority",
    "queue",
    "language",
];

/// Validate and normalize `start_domain_test` parameters.
pub fn parse_start_test(params: &Value, config: &Config) -> Result<TestParams, Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, START_TEST_KEYS, "", &mut errors);

    let domain = required_string(map, "domain", &mut errors)
        .and_then(|raw| validated_domain(raw, "/domain", &mut errors));

    let ipv4 = map.get("ipv4").map_or(true, coerce_bool);
    let ipv6 = map.get("ipv6").map_or(true, coerce_bool);

    let nameservers = parse_nameservers(map.get("nameservers"), &mut errors);
    let ds_info = parse_ds_info(map.get("ds_info"), &mut errors);
    let profile = parse_profile(map, config, &mut errors);
    let client_id = parse_client_tag(map, "client_id", &mut errors);
    let client_version = parse_client_tag(map, "client_version", &mut errors);

    let priority = parse_int_field(map, "priority", DEFAULT_PRIORITY, &mut errors);
    let queue = parse_int_field(map, "queue", config.zonemaster.lock_on_queue, &mut errors);
    let language = parse_language(map, config, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut params = TestParams {
        domain: domain.unwrap_or_default(),
        ipv4,
        ipv6,
        nameservers,
        ds_info,
        profile,
        client_id,
        client_version,
        priority,
        queue,
        language,
    };
    params.normalize();
    Ok(params)
}

fn parse_int_field(
    map: &Map<String, Value>,
    key: &str,
    default: i64,
    errors: &mut Vec<ParamError>,
) -> i64 {
    match map.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => coerce_int(value).unwrap_or_else(|| {
            errors.push(ParamError::new(format!("/{key}"), "Must be an integer"));
            default
        }),
    }
}

fn parse_client_tag(
    map: &Map<String, Value>,
    key: &str,
    errors: &mut Vec<ParamError>,
) -> Option<String> {
    let raw = string_field(map, key, "", errors)?;
    if valid_client_tag(raw) {
        Some(raw.to_string())
    } else {
        errors.push(ParamError::new(
            format!("/{key}"),
            "The character(s) are not supported",
        ));
        None
    }
}

fn parse_profile(map: &Map<String, Value>, config: &Config, errors: &mut Vec<ParamError>) -> String {
    let Some(raw) = map.get("profile") else {
        return "default".to_string();
    };
    let Value::String(raw) = raw else {
        errors.push(ParamError::new("/profile", "Must be a string"));
        return "default".to_string();
    };
    let Some(lower) = valid_profile_name(raw) else {
        errors.push(ParamError::new("/profile", "Invalid profile name format"));
        return "default".to_string();
    };
    if !config.has_profile(&lower) {
        errors.push(ParamError::new("/profile", "Unknown profile"));
    }
    lower
}

fn parse_language(
    map: &Map<String, Value>,
    config: &Config,
    errors: &mut Vec<ParamError>,
) -> Option<String> {
    let raw = string_field(map, "language", "", errors)?;
    match config.resolve_language_tag(raw) {
        Some(locale) => Some(locale),
        None => {
            errors.push(ParamError::new("/language", "Unknown language tag"));
            None
        }
    }
}

fn parse_nameservers(value: Option<&Value>, errors: &mut Vec<ParamError>) -> Vec<Nameserver> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Value::Array(items) = value else {
        errors.push(ParamError::new("/nameservers", "Must be an array"));
        return Vec::new();
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let prefix = format!("/nameservers/{idx}");
        let Value::Object(map) = item else {
            errors.push(ParamError::new(prefix, "Must be an object"));
            continue;
        };
        reject_unknown_keys(map, &["ns", "ip"], &prefix, errors);

        let ns = match map.get("ns") {
            Some(Value::String(raw)) => {
                validated_domain(raw, &format!("{prefix}/ns"), errors)
            }
            Some(_) => {
                errors.push(ParamError::new(format!("{prefix}/ns"), "Must be a string"));
                None
            }
            None => {
                errors.push(ParamError::new(
                    format!("{prefix}/ns"),
                    "Missing required property",
                ));
                None
            }
        };

        let ip = match map.get("ip") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) if raw.is_empty() => None,
            Some(Value::String(raw)) => match domain::canonical_ip(raw) {
                Some(canonical) => Some(canonical),
                None => {
                    errors.push(ParamError::new(
                        format!("{prefix}/ip"),
                        "Invalid IP address",
                    ));
                    None
                }
            },
            Some(_) => {
                errors.push(ParamError::new(format!("{prefix}/ip"), "Must be a string"));
                None
            }
        };

        if let Some(ns) = ns {
            out.push(Nameserver { ns, ip });
        }
    }
    out
}

fn parse_ds_info(value: Option<&Value>, errors: &mut Vec<ParamError>) -> Vec<DsInfo> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Value::Array(items) = value else {
        errors.push(ParamError::new("/ds_info", "Must be an array"));
        return Vec::new();
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let prefix = format!("/ds_info/{idx}");
        let Value::Object(map) = item else {
            errors.push(ParamError::new(prefix, "Must be an object"));
            continue;
        };
        reject_unknown_keys(map, &["keytag", "algorithm", "digtype", "digest"], &prefix, errors);

        let keytag = bounded_int(map, "keytag", &prefix, 0, i64::from(u16::MAX), errors);
        let algorithm = bounded_int(map, "algorithm", &prefix, 0, i64::from(u8::MAX), errors);
        let digtype = bounded_int(map, "digtype", &prefix, 0, i64::from(u8::MAX), errors);

        let digest = match map.get("digest") {
            Some(Value::String(raw)) if valid_ds_digest(raw) => Some(raw.to_ascii_lowercase()),
            Some(_) => {
                errors.push(ParamError::new(
                    format!("{prefix}/digest"),
                    "Invalid digest format",
                ));
                None
            }
            None => {
                errors.push(ParamError::new(
                    format!("{prefix}/digest"),
                    "Missing required property",
                ));
                None
            }
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        if let (Some(keytag), Some(algorithm), Some(digtype), Some(digest)) =
            (keytag, algorithm, digtype, digest)
        {
            out.push(DsInfo {
                keytag: keytag as u16,
                algorithm: algorithm as u8,
                digtype: digtype as u8,
                digest,
            });
        }
    }
    out
}

fn bounded_int(
    map: &Map<String, Value>,
    key: &str,
    prefix: &str,
    min: i64,
    max: i64,
    errors: &mut Vec<ParamError>,
) -> Option<i64> {
    let path = format!("{prefix}/{key}");
    let Some(value) = map.get(key) else {
        errors.push(ParamError::new(path, "Missing required property"));
        return None;
    };
    match coerce_int(value) {
        Some(i) if (min..=max).contains(&i) => Some(i),
        _ => {
            errors.push(ParamError::new(
                path,
                format!("Must be an integer between {min} and {max}"),
            ));
            None
        }
    }
}

/// Validated `get_test_history` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub domain: String,
    pub offset: i64,
    pub limit: i64,
    pub filter: HistoryFilter,
}

/// Delegation filter for history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFilter {
    All,
    Delegated,
    Undelegated,
}

/// Validate `get_test_history` parameters.
pub fn parse_history(params: &Value) -> Result<HistoryQuery, Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["offset", "limit", "filter", "frontend_params"], "", &mut errors);

    let offset = non_negative_int(map, "offset", 0, &mut errors);
    let limit = non_negative_int(map, "limit", 200, &mut errors);

    let filter = match map.get("filter") {
        None => HistoryFilter::All,
        Some(Value::String(s)) => match s.as_str() {
            "all" => HistoryFilter::All,
            "delegated" => HistoryFilter::Delegated,
            "undelegated" => HistoryFilter::Undelegated,
            _ => {
                errors.push(ParamError::new("/filter", "Unknown filter"));
                HistoryFilter::All
            }
        },
        Some(_) => {
            errors.push(ParamError::new("/filter", "Must be a string"));
            HistoryFilter::All
        }
    };

    let domain = match map.get("frontend_params") {
        Some(Value::Object(inner)) => {
            reject_unknown_keys(inner, &["domain"], "/frontend_params", &mut errors);
            match inner.get("domain") {
                Some(Value::String(raw)) => {
                    validated_domain(raw, "/frontend_params/domain", &mut errors)
                }
                Some(_) => {
                    errors.push(ParamError::new("/frontend_params/domain", "Must be a string"));
                    None
                }
                None => {
                    errors.push(ParamError::new(
                        "/frontend_params/domain",
                        "Missing required property",
                    ));
                    None
                }
            }
        }
        Some(_) => {
            errors.push(ParamError::new("/frontend_params", "Must be an object"));
            None
        }
        None => {
            errors.push(ParamError::new("/frontend_params", "Missing required property"));
            None
        }
    };

    if errors.is_empty() {
        Ok(HistoryQuery {
            domain: domain.unwrap_or_default(),
            offset,
            limit,
            filter,
        })
    } else {
        Err(errors)
    }
}

fn non_negative_int(
    map: &Map<String, Value>,
    key: &str,
    default: i64,
    errors: &mut Vec<ParamError>,
) -> i64 {
    match map.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => match coerce_int(value) {
            Some(i) if i >= 0 => i,
            _ => {
                errors.push(ParamError::new(
                    format!("/{key}"),
                    "Must be a non-negative integer",
                ));
                default
            }
        },
    }
}

/// Validate a `{test_id}`-shaped params object. `key` is `"test_id"` or
/// `"id"` depending on the method.
pub fn parse_test_id(params: &Value, key: &str) -> Result<String, Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &[key], "", &mut errors);

    let id = extract_test_id(map, key, &mut errors);
    match (id, errors.is_empty()) {
        (Some(id), true) => Ok(id),
        _ => Err(errors),
    }
}

fn extract_test_id(
    map: &Map<String, Value>,
    key: &str,
    errors: &mut Vec<ParamError>,
) -> Option<String> {
    let raw = required_string(map, key, errors)?;
    if raw.len() == 16
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        Some(raw.to_string())
    } else {
        errors.push(ParamError::new(format!("/{key}"), "Invalid test id format"));
        None
    }
}

/// Validate `get_test_results` parameters: `{id, language}`.
pub fn parse_results_request(
    params: &Value,
    config: &Config,
) -> Result<(String, String), Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["id", "language"], "", &mut errors);

    let id = extract_test_id(map, "id", &mut errors);

    let locale = match map.get("language") {
        Some(Value::String(raw)) => match config.resolve_language_tag(raw) {
            Some(locale) => Some(locale),
            None => {
                errors.push(ParamError::new("/language", "Unknown language tag"));
                None
            }
        },
        Some(_) => {
            errors.push(ParamError::new("/language", "Must be a string"));
            None
        }
        None => {
            errors.push(ParamError::new("/language", "Missing required property"));
            None
        }
    };

    match (id, locale, errors.is_empty()) {
        (Some(id), Some(locale), true) => Ok((id, locale)),
        _ => Err(errors),
    }
}

/// Validated credentials for `add_api_user`.
pub fn parse_credentials(params: &Value) -> Result<(String, String), Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["username", "api_key"], "", &mut errors);

    let username = credentials_username(map, &mut errors);
    let api_key = credentials_api_key(map, &mut errors);

    match (username, api_key, errors.is_empty()) {
        (Some(u), Some(k), true) => Ok((u, k)),
        _ => Err(errors),
    }
}

fn credentials_username(map: &Map<String, Value>, errors: &mut Vec<ParamError>) -> Option<String> {
    let raw = required_string(map, "username", errors)?;
    if valid_username(raw) {
        Some(raw.to_string())
    } else {
        errors.push(ParamError::new("/username", "Invalid username format"));
        None
    }
}

fn credentials_api_key(map: &Map<String, Value>, errors: &mut Vec<ParamError>) -> Option<String> {
    let raw = required_string(map, "api_key", errors)?;
    if valid_api_key(raw) {
        Some(raw.to_string())
    } else {
        errors.push(ParamError::new("/api_key", "Invalid API key format"));
        None
    }
}

/// Validated `add_batch_job` request: credentials, domains, and the
/// per-test parameter template (no domain, batch defaults).
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub username: String,
    pub api_key: String,
    pub domains: Vec<String>,
    pub template: TestParams,
}

/// Validate `add_batch_job` parameters.
pub fn parse_batch(params: &Value, config: &Config) -> Result<BatchRequest, Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["username", "api_key", "domains", "test_params"], "", &mut errors);

    let username = credentials_username(map, &mut errors);
    let api_key = credentials_api_key(map, &mut errors);

    let mut domains: Vec<String> = Vec::new();
    match map.get("domains") {
        Some(Value::Array(items)) if !items.is_empty() => {
            for (idx, item) in items.iter().enumerate() {
                let path = format!("/domains/{idx}");
                let Value::String(raw) = item else {
                    errors.push(ParamError::new(path, "Must be a string"));
                    continue;
                };
                let Some(normalized) = validated_domain(raw, &path, &mut errors) else {
                    continue;
                };
                if domains.contains(&normalized) {
                    errors.push(ParamError::new(path, "Duplicate domain in batch"));
                } else {
                    domains.push(normalized);
                }
            }
        }
        Some(Value::Array(_)) => {
            errors.push(ParamError::new("/domains", "Must be a non-empty array"));
        }
        Some(_) => {
            errors.push(ParamError::new("/domains", "Must be an array"));
        }
        None => {
            errors.push(ParamError::new("/domains", "Missing required property"));
        }
    }

    // The per-test template reuses the start_domain_test schema minus the
    // domain, with the batch priority default.
    let template = match map.get("test_params") {
        None => batch_template(&Value::Object(Map::new()), config, &mut errors),
        Some(value) => batch_template(value, config, &mut errors),
    };

    match (username, api_key, template, errors.is_empty()) {
        (Some(username), Some(api_key), Some(template), true) => Ok(BatchRequest {
            username,
            api_key,
            domains,
            template,
        }),
        _ => Err(errors),
    }
}

fn batch_template(
    value: &Value,
    config: &Config,
    errors: &mut Vec<ParamError>,
) -> Option<TestParams> {
    let Value::Object(map) = value else {
        errors.push(ParamError::new("/test_params", "Must be an object"));
        return None;
    };
    if map.contains_key("domain") {
        errors.push(ParamError::new("/test_params/domain", "Unrecognized property"));
    }

    let mut with_domain = map.clone();
    with_domain.insert("domain".to_string(), Value::String(".".to_string()));
    if !with_domain.contains_key("priority") {
        with_domain.insert(
            "priority".to_string(),
            Value::Number(DEFAULT_BATCH_PRIORITY.into()),
        );
    }

    match parse_start_test(&Value::Object(with_domain), config) {
        Ok(mut template) => {
            template.domain = String::new();
            Some(template)
        }
        Err(inner) => {
            errors.extend(inner.into_iter().filter(|e| e.path != "/domain").map(|e| {
                ParamError::new(format!("/test_params{}", e.path), e.message)
            }));
            None
        }
    }
}

/// Validate `get_batch_job_result` parameters.
pub fn parse_batch_id(params: &Value) -> Result<i64, Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["batch_id"], "", &mut errors);

    let batch_id = match map.get("batch_id") {
        Some(value) => match coerce_int(value) {
            Some(i) if i > 0 => Some(i),
            _ => {
                errors.push(ParamError::new("/batch_id", "Invalid batch id"));
                None
            }
        },
        None => {
            errors.push(ParamError::new("/batch_id", "Missing required property"));
            None
        }
    };

    match (batch_id, errors.is_empty()) {
        (Some(id), true) => Ok(id),
        _ => Err(errors),
    }
}

/// Validate `get_host_by_name` parameters.
pub fn parse_hostname(params: &Value) -> Result<String, Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["hostname"], "", &mut errors);

    let hostname = required_string(map, "hostname", &mut errors)
        .and_then(|raw| validated_domain(raw, "/hostname", &mut errors));

    match (hostname, errors.is_empty()) {
        (Some(h), true) => Ok(h),
        _ => Err(errors),
    }
}

/// Validate `get_data_from_parent_zone` parameters.
pub fn parse_parent_zone_request(
    params: &Value,
    config: &Config,
) -> Result<(String, Option<String>), Vec<ParamError>> {
    let mut errors = Vec::new();
    let Some(map) = as_object(params, &mut errors) else {
        return Err(errors);
    };
    reject_unknown_keys(map, &["domain", "language"], "", &mut errors);

    let domain = required_string(map, "domain", &mut errors)
        .and_then(|raw| validated_domain(raw, "/domain", &mut errors));
    let language = parse_language(map, config, &mut errors);

    match (domain, errors.is_empty()) {
        (Some(d), true) => Ok((d, language)),
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn int_coercion_rules() {
        assert_eq!(coerce_int(&json!(5)), Some(5));
        assert_eq!(coerce_int(&json!("7")), Some(7));
        assert_eq!(coerce_int(&json!("-7")), Some(-7));
        assert_eq!(coerce_int(&json!(2.5)), Some(3));
        assert_eq!(coerce_int(&json!(-2.5)), Some(-3));
        assert_eq!(coerce_int(&json!(2.4)), Some(2));
        assert_eq!(coerce_int(&json!("x")), None);
        assert_eq!(coerce_int(&json!(true)), None);
    }

    #[test]
    fn bool_coercion_rules() {
        for falsy in [json!(false), json!(null), json!(""), json!("0"), json!(0)] {
            assert!(!coerce_bool(&falsy), "{falsy} should be false");
        }
        for truthy in [json!(true), json!("false"), json!("1"), json!(1), json!([])] {
            assert!(coerce_bool(&truthy), "{truthy} should be true");
        }
    }

    #[test]
    fn start_test_minimal_gets_defaults() {
        let params = parse_start_test(&json!({"domain": "Example.COM."}), &config()).unwrap();
        assert_eq!(params.domain, "example.com");
        assert!(params.ipv4);
        assert!(params.ipv6);
        assert_eq!(params.profile, "default");
        assert_eq!(params.priority, 10);
        assert_eq!(params.queue, 0);
        assert!(params.nameservers.is_empty());
        assert!(!params.undelegated());
    }

    #[test]
    fn start_test_rejects_unknown_property() {
        let errors = parse_start_test(&json!({"domain": "a.test", "bogus": 1}), &config())
            .unwrap_err();
        assert_eq!(errors[0].path, "/bogus");
        assert_eq!(errors[0].message, "Unrecognized property");
    }

    #[test]
    fn start_test_reports_domain_message() {
        let errors = parse_start_test(&json!({"domain": "ex ample.com"}), &config()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/domain");
        assert_eq!(
            errors[0].message,
            "The domain name character(s) are not supported"
        );
    }

    #[test]
    fn start_test_coerces_priority_and_flags() {
        let params = parse_start_test(
            &json!({"domain": "a.test", "priority": "3", "queue": 1.5, "ipv6": "0"}),
            &config(),
        )
        .unwrap();
        assert_eq!(params.priority, 3);
        assert_eq!(params.queue, 2);
        assert!(params.ipv4);
        assert!(!params.ipv6);
    }

    #[test]
    fn start_test_validates_nameservers_and_ds() {
        let errors = parse_start_test(
            &json!({
                "domain": "a.test",
                "nameservers": [
                    {"ns": "ns1.a.test", "ip": "192.0.2.1"},
                    {"ns": "bad name", "ip": "nope", "x": 1}
                ],
                "ds_info": [
                    {"keytag": 70000, "algorithm": 8, "digtype": 2, "digest": "zz"}
                ]
            }),
            &config(),
        )
        .unwrap_err();

        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"/nameservers/1/x"));
        assert!(paths.contains(&"/nameservers/1/ns"));
        assert!(paths.contains(&"/nameservers/1/ip"));
        assert!(paths.contains(&"/ds_info/0/keytag"));
        assert!(paths.contains(&"/ds_info/0/digest"));
    }

    #[test]
    fn start_test_unknown_profile() {
        let errors =
            parse_start_test(&json!({"domain": "a.test", "profile": "nope"}), &config())
                .unwrap_err();
        assert_eq!(errors[0].path, "/profile");
        assert_eq!(errors[0].message, "Unknown profile");
    }

    #[test]
    fn start_test_language_resolution() {
        let params = parse_start_test(
            &json!({"domain": "a.test", "language": "en"}),
            &config(),
        )
        .unwrap();
        assert_eq!(params.language.as_deref(), Some("en_US"));

        let errors = parse_start_test(
            &json!({"domain": "a.test", "language": "xx"}),
            &config(),
        )
        .unwrap_err();
        assert_eq!(errors[0].message, "Unknown language tag");
    }

    #[test]
    fn history_defaults_and_filter() {
        let query = parse_history(&json!({
            "frontend_params": {"domain": "A.test"}
        }))
        .unwrap();
        assert_eq!(query.domain, "a.test");
        assert_eq!(query.offset, 0);
        assert_eq!(query.limit, 200);
        assert_eq!(query.filter, HistoryFilter::All);

        let query = parse_history(&json!({
            "offset": "5",
            "limit": 10,
            "filter": "undelegated",
            "frontend_params": {"domain": "a.test"}
        }))
        .unwrap();
        assert_eq!(query.offset, 5);
        assert_eq!(query.limit, 10);
        assert_eq!(query.filter, HistoryFilter::Undelegated);

        assert!(parse_history(&json!({"frontend_params": {}})).is_err());
        assert!(parse_history(&json!({"offset": -1, "frontend_params": {"domain": "a.test"}}))
            .is_err());
    }

    #[test]
    fn test_id_shape() {
        assert!(parse_test_id(&json!({"test_id": "0123456789abcdef"}), "test_id").is_ok());
        assert!(parse_test_id(&json!({"test_id": "0123456789ABCDEF"}), "test_id").is_err());
        assert!(parse_test_id(&json!({"test_id": "short"}), "test_id").is_err());
        assert!(parse_test_id(&json!({}), "test_id").is_err());
    }

    #[test]
    fn credentials_patterns() {
        assert!(parse_credentials(&json!({"username": "alice", "api_key": "k1"})).is_ok());
        assert!(parse_credentials(&json!({"username": "bad user", "api_key": "k"})).is_err());
        assert!(parse_credentials(&json!({"username": "alice"})).is_err());
    }

    #[test]
    fn batch_request_defaults_and_dedup() {
        let request = parse_batch(
            &json!({
                "username": "alice",
                "api_key": "secret",
                "domains": ["a.test", "B.test."]
            }),
            &config(),
        )
        .unwrap();
        assert_eq!(request.domains, vec!["a.test", "b.test"]);
        assert_eq!(request.template.priority, 5);
        assert_eq!(request.template.queue, 0);
        assert_eq!(request.template.profile, "default");

        let errors = parse_batch(
            &json!({
                "username": "alice",
                "api_key": "secret",
                "domains": ["a.test", "A.test."]
            }),
            &config(),
        )
        .unwrap_err();
        assert_eq!(errors[0].path, "/domains/1");
        assert_eq!(errors[0].message, "Duplicate domain in batch");
    }

    #[test]
    fn batch_template_rejects_domain_and_maps_paths() {
        let errors = parse_batch(
            &json!({
                "username": "alice",
                "api_key": "secret",
                "domains": ["a.test"],
                "test_params": {"domain": "x.test", "profile": "nope"}
            }),
            &config(),
        )
        .unwrap_err();

        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"/test_params/domain"));
        assert!(paths.contains(&"/test_params/profile"));
    }

    #[test]
    fn empty_params_methods() {
        assert!(parse_empty(None).is_ok());
        assert!(parse_empty(Some(&json!(null))).is_ok());
        assert!(parse_empty(Some(&json!({}))).is_ok());
        assert!(parse_empty(Some(&json!({"x": 1}))).is_err());
        assert!(parse_empty(Some(&json!([]))).is_err());
    }
}
