//! Result documents and the severity model.
//!
//! The testing engine emits log entries at eight severities; the three
//! `DEBUG*` levels are internal to the engine and are dropped when a result
//! document enters the store. Everything downstream (stored results,
//! translated messages, history summaries) only ever sees `INFO` and above.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity of one result entry, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug3,
    Debug2,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug3 => "DEBUG3",
            Self::Debug2 => "DEBUG2",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Levels below `INFO` never leave the engine boundary.
    pub const fn is_reportable(self) -> bool {
        matches!(
            self,
            Self::Info | Self::Notice | Self::Warning | Self::Error | Self::Critical
        )
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of a completed test's result document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntry {
    pub module: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    pub level: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl ResultEntry {
    /// The name server this entry talks about, when the engine tagged one.
    pub fn ns(&self) -> Option<&str> {
        self.args.get("ns").and_then(Value::as_str)
    }
}

/// Drop entries below `INFO`. Applied once, where results enter the store.
pub fn boundary_filter(entries: Vec<ResultEntry>) -> Vec<ResultEntry> {
    entries
        .into_iter()
        .filter(|e| e.level.is_reportable())
        .collect()
}

/// Summary verdict over a result document, for history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallResult {
    Ok,
    Warning,
    Error,
    Critical,
}

impl OverallResult {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Derive the summary verdict from the maximum severity present.
///
/// `INFO` and `NOTICE` count as ok; an empty document is ok.
pub fn overall_result(entries: &[ResultEntry]) -> OverallResult {
    let max = entries.iter().map(|e| e.level).max();
    match max {
        Some(Severity::Critical) => OverallResult::Critical,
        Some(Severity::Error) => OverallResult::Error,
        Some(Severity::Warning) => OverallResult::Warning,
        _ => OverallResult::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(level: Severity) -> ResultEntry {
        ResultEntry {
            module: "NAMESERVER".to_string(),
            tag: "NO_RESPONSE".to_string(),
            args: Map::new(),
            level,
            timestamp: None,
        }
    }

    #[test]
    fn severity_order_matches_the_ladder() {
        assert!(Severity::Debug3 < Severity::Debug);
        assert!(Severity::Info < Severity::Notice);
        assert!(Severity::Notice < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn boundary_filter_drops_debug_levels() {
        let entries = vec![
            entry(Severity::Debug3),
            entry(Severity::Debug),
            entry(Severity::Info),
            entry(Severity::Warning),
        ];
        let kept = boundary_filter(entries);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|e| e.level.is_reportable()));
    }

    #[test]
    fn overall_result_from_max_severity() {
        assert_eq!(overall_result(&[]), OverallResult::Ok);
        assert_eq!(
            overall_result(&[entry(Severity::Info), entry(Severity::Notice)]),
            OverallResult::Ok
        );
        assert_eq!(
            overall_result(&[entry(Severity::Info), entry(Severity::Warning)]),
            OverallResult::Warning
        );
        assert_eq!(
            overall_result(&[entry(Severity::Critical), entry(Severity::Warning)]),
            OverallResult::Critical
        );
    }

    #[test]
    fn entry_round_trips_through_json() {
        let parsed: ResultEntry = serde_json::from_value(json!({
            "module": "SYSTEM",
            "tag": "POLICY_DISABLED",
            "args": {"name": "Example"},
            "level": "NOTICE",
            "timestamp": 1.25
        }))
        .unwrap();

        assert_eq!(parsed.level, Severity::Notice);
        assert_eq!(parsed.args.get("name"), Some(&json!("Example")));
        assert_eq!(parsed.ns(), None);

        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["level"], "NOTICE");
    }
}
