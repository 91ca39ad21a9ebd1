//! RPC method implementations.
//!
//! Each method validates its params, runs at most one store transaction,
//! and shapes the result. User errors come back with structured `data`;
//! anything unexpected wraps as an internal error and is logged at error
//! severity.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use zonewatch_core::config::Config;
use zonewatch_core::i18n::{FallbackCatalog, Translator};
use zonewatch_core::results::{overall_result, ResultEntry};
use zonewatch_core::validation::{self, ParamError};

use super::rpc::{self, RpcError, RpcRequest};
use crate::engine::ZoneDataSource;
use crate::storage::{AddUserOutcome, CreateTest, Store, StoreError, TestRow};

/// The broker's RPC surface.
pub struct RpcService {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    engine: Arc<dyn ZoneDataSource>,
    translator: Arc<dyn Translator>,
}

impl RpcService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        engine: Arc<dyn ZoneDataSource>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            translator,
        }
    }

    /// Handle one request envelope and produce the response envelope.
    pub async fn handle(&self, request: RpcRequest, remote_ip: IpAddr) -> Value {
        let id = request.id.clone().unwrap_or(Value::Null);
        let Some(method) = request.method else {
            return rpc::error_envelope(id, &RpcError::MethodNotFound);
        };

        match self.dispatch(&method, request.params.as_ref(), remote_ip).await {
            Ok(result) => {
                debug!(%method, "RPC call succeeded");
                rpc::result_envelope(id, result)
            }
            Err(e) => {
                if matches!(e, RpcError::PermissionDenied { .. }) {
                    warn!(%method, %remote_ip, "Administrative method denied");
                } else if e.is_user_error() {
                    info!(%method, code = e.code(), message = %e.message(), "RPC user error");
                } else {
                    error!(%method, message = %e.message(), "RPC internal error");
                }
                rpc::error_envelope(id, &e)
            }
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<&Value>,
        remote_ip: IpAddr,
    ) -> Result<Value, RpcError> {
        let null = Value::Null;
        let value = params.unwrap_or(&null);
        match method {
            rpc::METHOD_VERSION_INFO => {
                self.check_empty(params)?;
                Ok(self.version_info())
            }
            rpc::METHOD_PROFILE_NAMES => {
                self.check_empty(params)?;
                Ok(json!(self.config.profile_names()))
            }
            rpc::METHOD_GET_LANGUAGE_TAGS => {
                self.check_empty(params)?;
                Ok(json!(self.config.language_tags()))
            }
            rpc::METHOD_GET_HOST_BY_NAME => self.get_host_by_name(value).await,
            rpc::METHOD_GET_DATA_FROM_PARENT_ZONE => {
                self.get_data_from_parent_zone(value).await
            }
            rpc::METHOD_START_DOMAIN_TEST => self.start_domain_test(value).await,
            rpc::METHOD_TEST_PROGRESS => self.test_progress(value).await,
            rpc::METHOD_GET_TEST_RESULTS => self.get_test_results(value).await,
            rpc::METHOD_GET_TEST_HISTORY => self.get_test_history(value).await,
            rpc::METHOD_GET_TEST_PARAMS => self.get_test_params(value).await,
            rpc::METHOD_GET_BATCH_JOB_RESULT => self.get_batch_job_result(value).await,
            rpc::METHOD_ADD_BATCH_JOB => {
                if !self.config.rpcapi.enable_add_batch_job {
                    return Err(RpcError::MethodNotFound);
                }
                self.add_batch_job(value).await
            }
            rpc::METHOD_ADD_API_USER => {
                if !self.config.rpcapi.enable_add_api_user {
                    return Err(RpcError::MethodNotFound);
                }
                if !rpc::is_loopback(remote_ip) {
                    return Err(RpcError::PermissionDenied { remote_ip });
                }
                self.add_api_user(value).await
            }
            _ => Err(RpcError::MethodNotFound),
        }
    }

    // -----------------------------------------------------------------------
    // Unrestricted methods
    // -----------------------------------------------------------------------

    fn version_info(&self) -> Value {
        json!({
            "zonemaster_backend": env!("CARGO_PKG_VERSION"),
            "zonemaster_engine": self.engine.version(),
        })
    }

    async fn get_host_by_name(&self, params: &Value) -> Result<Value, RpcError> {
        let hostname = validation::parse_hostname(params)
            .map_err(|e| self.invalid_params(params, e))?;

        let ips = self.engine.host_by_name(&hostname).await;
        let entries: Vec<Value> = if ips.is_empty() {
            vec![single_entry(&hostname, "0.0.0.0")]
        } else {
            // One entry per address, in resolver order.
            ips.iter()
                .map(|ip| single_entry(&hostname, &ip.to_string()))
                .collect()
        };
        Ok(json!(entries))
    }

    async fn get_data_from_parent_zone(&self, params: &Value) -> Result<Value, RpcError> {
        let (domain, _language) = validation::parse_parent_zone_request(params, &self.config)
            .map_err(|e| self.invalid_params(params, e))?;

        let data = self.engine.parent_zone_data(&domain).await;
        serde_json::to_value(data).map_err(|e| RpcError::Internal(e.to_string()))
    }

    async fn start_domain_test(&self, params: &Value) -> Result<Value, RpcError> {
        let parsed = validation::parse_start_test(params, &self.config)
            .map_err(|e| self.invalid_params(params, e))?;

        let request = CreateTest::from_params(&parsed)?;
        let test_id = self
            .store
            .create_test(&request, self.config.zonemaster.age_reuse_previous_test)
            .await?;

        info!(domain = %parsed.domain, %test_id, "Test request accepted");
        Ok(json!(test_id))
    }

    async fn test_progress(&self, params: &Value) -> Result<Value, RpcError> {
        let test_id = validation::parse_test_id(params, "test_id")
            .map_err(|e| self.invalid_params(params, e))?;
        let row = self.store.read_test(&test_id).await?;
        Ok(json!(row.progress))
    }

    async fn get_test_results(&self, params: &Value) -> Result<Value, RpcError> {
        let (test_id, locale) = validation::parse_results_request(params, &self.config)
            .map_err(|e| self.invalid_params(params, e))?;

        let row = self.store.read_test(&test_id).await?;
        let entries = row
            .result_entries()
            .map_err(|e| RpcError::Internal(format!("Stored results unreadable: {e}")))?;

        let results: Vec<Value> = entries
            .iter()
            .filter(|entry| !is_dropped_policy_entry(entry))
            .map(|entry| {
                let message = rewrite_legacy_paths(&self.translate(entry, &locale));
                let mut out = json!({
                    "module": entry.module,
                    "message": message,
                    "level": entry.level.as_str(),
                });
                if let Some(ns) = entry.ns() {
                    out["ns"] = json!(ns);
                }
                out
            })
            .collect();

        Ok(json!({
            "creation_time": format_time(row.creation_time),
            "id": row.id,
            "hash_id": row.hash_id,
            "params": self.params_of(&row)?,
            "results": results,
        }))
    }

    async fn get_test_history(&self, params: &Value) -> Result<Value, RpcError> {
        let query =
            validation::parse_history(params).map_err(|e| self.invalid_params(params, e))?;

        let rows = self.store.history(&query).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let entries = row
                .result_entries()
                .map_err(|e| RpcError::Internal(format!("Stored results unreadable: {e}")))?;
            out.push(json!({
                "id": row.hash_id,
                "creation_time": format_time(row.creation_time),
                "overall_result": overall_result(&entries).as_str(),
                "undelegated": row.undelegated,
            }));
        }
        Ok(json!(out))
    }

    async fn get_test_params(&self, params: &Value) -> Result<Value, RpcError> {
        let test_id = validation::parse_test_id(params, "test_id")
            .map_err(|e| self.invalid_params(params, e))?;
        let row = self.store.read_test(&test_id).await?;
        self.params_of(&row)
    }

    async fn get_batch_job_result(&self, params: &Value) -> Result<Value, RpcError> {
        let batch_id =
            validation::parse_batch_id(params).map_err(|e| self.invalid_params(params, e))?;
        let status = self.store.batch_status(batch_id).await?;
        Ok(json!({
            "nb_finished": status.nb_finished,
            "nb_running": status.nb_running,
            "finished_test_ids": status.finished_test_ids,
        }))
    }

    async fn add_batch_job(&self, params: &Value) -> Result<Value, RpcError> {
        let request = validation::parse_batch(params, &self.config)
            .map_err(|e| self.invalid_params(params, e))?;

        let mut tests = Vec::with_capacity(request.domains.len());
        for domain in &request.domains {
            let mut test = request.template.clone();
            test.domain = domain.clone();
            tests.push(CreateTest::from_params(&test)?);
        }

        let batch_id = self
            .store
            .create_batch(&request.username, &request.api_key, &tests)
            .await?;

        info!(
            username = %request.username,
            batch_id,
            domains = tests.len(),
            "Batch job created"
        );
        Ok(json!(batch_id))
    }

    // -----------------------------------------------------------------------
    // Administrative methods (loopback only)
    // -----------------------------------------------------------------------

    async fn add_api_user(&self, params: &Value) -> Result<Value, RpcError> {
        let (username, api_key) =
            validation::parse_credentials(params).map_err(|e| self.invalid_params(params, e))?;

        match self.store.add_user(&username, &api_key).await? {
            AddUserOutcome::Created => {
                info!(%username, "API user added");
                Ok(json!(1))
            }
            AddUserOutcome::AlreadyExists { same_key: true } => Ok(json!(0)),
            AddUserOutcome::AlreadyExists { same_key: false } => {
                Err(StoreError::UserExists(username).into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn check_empty(&self, params: Option<&Value>) -> Result<(), RpcError> {
        validation::parse_empty(params).map_err(|e| self.invalid_params(params.unwrap_or(&Value::Null), e))
    }

    /// Translate the message list into the language the client asked for,
    /// falling back to the untranslated source form when the requested
    /// language is itself unusable.
    fn invalid_params(&self, params: &Value, errors: Vec<ParamError>) -> RpcError {
        let locale = params
            .get("language")
            .and_then(Value::as_str)
            .and_then(|tag| self.config.resolve_language_tag(tag));

        match locale {
            Some(locale) => RpcError::InvalidParams(
                errors
                    .into_iter()
                    .map(|e| {
                        let message = self.translator.validation_message(&e.message, &locale);
                        ParamError::new(e.path, message)
                    })
                    .collect(),
            ),
            None => RpcError::InvalidParams(errors),
        }
    }

    fn translate(&self, entry: &ResultEntry, locale: &str) -> String {
        self.translator
            .message(entry, locale)
            .or_else(|| FallbackCatalog.message(entry, locale))
            .unwrap_or_else(|| entry.tag.clone())
    }

    fn params_of(&self, row: &TestRow) -> Result<Value, RpcError> {
        row.params_value()
            .map_err(|e| RpcError::Internal(format!("Stored params unreadable: {e}")))
    }
}

fn single_entry(hostname: &str, ip: &str) -> Value {
    let mut entry = Map::new();
    entry.insert(hostname.to_string(), json!(ip));
    Value::Object(entry)
}

fn is_dropped_policy_entry(entry: &ResultEntry) -> bool {
    entry.module == "SYSTEM"
        && entry.tag == "POLICY_DISABLED"
        && entry.args.get("name").and_then(Value::as_str) == Some("Example")
}

/// Replace the whitespace-delimited token containing `needle` with `label`.
fn replace_path_token(message: &str, needle: &str, label: &str) -> String {
    let Some(pos) = message.find(needle) else {
        return message.to_string();
    };
    let start = message[..pos]
        .rfind(char::is_whitespace)
        .map_or(0, |i| i + 1);
    let end = message[pos..]
        .find(char::is_whitespace)
        .map_or(message.len(), |i| pos + i);
    format!("{}{}{}", &message[..start], label, &message[end..])
}

/// Legacy message rewrites: raw on-disk paths in two system messages are
/// replaced with human labels before leaving the API.
fn rewrite_legacy_paths(message: &str) -> String {
    let message = replace_path_token(message, "policy.json", "the policy file");
    replace_path_token(&message, "config.json", "the configuration file")
}

fn format_time(epoch_seconds: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_seconds, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}
