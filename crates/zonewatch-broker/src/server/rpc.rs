//! JSON-RPC envelope and error taxonomy.
//!
//! The protocol is JSON-RPC 2.0 with documented deviations: the `jsonrpc`
//! field value is not enforced, and post-dispatch user errors (open batch,
//! unknown user, add-user conflict) answer with code `-32603` rather than
//! `-32602` — clients depend on that mapping.

use std::net::IpAddr;

use serde::Deserialize;
use serde_json::{json, Value};

use zonewatch_core::validation::ParamError;

use crate::storage::StoreError;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// ---------------------------------------------------------------------------
// Method names
// ---------------------------------------------------------------------------

pub const METHOD_VERSION_INFO: &str = "version_info";
pub const METHOD_PROFILE_NAMES: &str = "profile_names";
pub const METHOD_GET_LANGUAGE_TAGS: &str = "get_language_tags";
pub const METHOD_GET_HOST_BY_NAME: &str = "get_host_by_name";
pub const METHOD_GET_DATA_FROM_PARENT_ZONE: &str = "get_data_from_parent_zone";
pub const METHOD_START_DOMAIN_TEST: &str = "start_domain_test";
pub const METHOD_TEST_PROGRESS: &str = "test_progress";
pub const METHOD_GET_TEST_RESULTS: &str = "get_test_results";
pub const METHOD_GET_TEST_HISTORY: &str = "get_test_history";
pub const METHOD_GET_TEST_PARAMS: &str = "get_test_params";
pub const METHOD_GET_BATCH_JOB_RESULT: &str = "get_batch_job_result";
pub const METHOD_ADD_BATCH_JOB: &str = "add_batch_job";
pub const METHOD_ADD_API_USER: &str = "add_api_user";

/// One JSON-RPC request envelope. Every field is optional at the parse
/// layer; a missing method is answered with `-32601` rather than a parse
/// error.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Post-parse errors, mapped onto the wire codes above.
#[derive(Debug)]
pub enum RpcError {
    Parse,
    MethodNotFound,
    InvalidParams(Vec<ParamError>),
    Internal(String),
    PermissionDenied { remote_ip: IpAddr },
    User { message: String, data: Value },
}

impl RpcError {
    pub const fn code(&self) -> i64 {
        match self {
            Self::Parse => PARSE_ERROR,
            Self::MethodNotFound => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            // PermissionDenied and User deliberately share the internal
            // code; the legacy protocol never used -32602 after dispatch.
            Self::Internal(_) | Self::PermissionDenied { .. } | Self::User { .. } => {
                INTERNAL_ERROR
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Parse => "Parse error".to_string(),
            Self::MethodNotFound => "Method not found".to_string(),
            Self::InvalidParams(_) => "Invalid method parameter(s)".to_string(),
            Self::Internal(message) | Self::User { message, .. } => message.clone(),
            Self::PermissionDenied { .. } => "Permission denied".to_string(),
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            Self::InvalidParams(errors) => Some(json!(errors)),
            Self::PermissionDenied { remote_ip } => {
                Some(json!({ "remote_ip": remote_ip.to_string() }))
            }
            Self::User { data, .. } if !data.is_null() => Some(data.clone()),
            _ => None,
        }
    }

    /// User errors are client mistakes and never logged at error severity.
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParams(_) | Self::User { .. } | Self::MethodNotFound
        )
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthorized(username) => Self::User {
                message: "User not authorized".to_string(),
                data: json!({ "username": username }),
            },
            StoreError::UserExists(username) => Self::User {
                message: "User already exists".to_string(),
                data: json!({ "username": username }),
            },
            StoreError::BatchStillRunning {
                batch_id,
                creation_time,
            } => Self::User {
                message: "Batch job still running".to_string(),
                data: json!({ "batch_id": batch_id, "creation_time": creation_time }),
            },
            StoreError::BatchNotFound(batch_id) => Self::User {
                message: "Unknown batch job id".to_string(),
                data: json!({ "batch_id": batch_id }),
            },
            StoreError::TestNotFound(test_id) => Self::User {
                message: "Unknown test id".to_string(),
                data: json!({ "test_id": test_id }),
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

/// A successful response envelope.
pub fn result_envelope(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// An error response envelope.
pub fn error_envelope(id: Value, error: &RpcError) -> Value {
    let mut body = json!({ "code": error.code(), "message": error.message() });
    if let Some(data) = error.data() {
        body["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": body })
}

/// Loopback check for the administrative privilege class: `127.0.0.1`,
/// `::1`, and the v4-mapped `::ffff:127.0.0.1`.
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_protocol() {
        assert_eq!(RpcError::Parse.code(), -32700);
        assert_eq!(RpcError::MethodNotFound.code(), -32601);
        assert_eq!(RpcError::InvalidParams(Vec::new()).code(), -32602);
        assert_eq!(RpcError::Internal("x".to_string()).code(), -32603);
        assert_eq!(
            RpcError::PermissionDenied {
                remote_ip: "10.0.0.1".parse().unwrap()
            }
            .code(),
            -32603
        );
    }

    #[test]
    fn permission_denied_carries_remote_ip() {
        let error = RpcError::PermissionDenied {
            remote_ip: "10.0.0.1".parse().unwrap(),
        };
        assert_eq!(error.data().unwrap()["remote_ip"], "10.0.0.1");
    }

    #[test]
    fn store_user_errors_map_to_structured_data() {
        let error: RpcError = StoreError::BatchStillRunning {
            batch_id: 1,
            creation_time: 123,
        }
        .into();
        assert_eq!(error.code(), -32603);
        assert_eq!(error.message(), "Batch job still running");
        assert_eq!(error.data().unwrap()["batch_id"], 1);
        assert!(error.is_user_error());

        let error: RpcError = StoreError::Query("boom".to_string()).into();
        assert!(!error.is_user_error());
    }

    #[test]
    fn loopback_classification() {
        assert!(is_loopback("127.0.0.1".parse().unwrap()));
        assert!(is_loopback("::1".parse().unwrap()));
        assert!(is_loopback("::ffff:127.0.0.1".parse().unwrap()));
        assert!(!is_loopback("10.0.0.1".parse().unwrap()));
        assert!(!is_loopback("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn envelopes_have_the_wire_shape() {
        let ok = result_envelope(json!(7), json!("abc"));
        assert_eq!(ok["jsonrpc"], "2.0");
        assert_eq!(ok["id"], 7);
        assert_eq!(ok["result"], "abc");

        let err = error_envelope(json!(7), &RpcError::MethodNotFound);
        assert_eq!(err["error"]["code"], -32601);
        assert!(err["error"].get("data").is_none());
    }
}
