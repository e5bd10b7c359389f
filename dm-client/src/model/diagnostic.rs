//! Diagnostic error codes and log entries

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use dm_protocol::LogSeverity;
use parking_lot::Mutex;
use resource_tree::{Resource, Result};
use serde_json::{json, Value};

/// One diagnostic log entry
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    /// Optional binary attachment, sent base64-encoded
    pub data: Option<Vec<u8>>,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, severity: LogSeverity) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
            severity,
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Wire form: `{message, severity, timestamp, data?}`
    pub fn to_wire(&self) -> Value {
        let mut wire = json!({
            "message": self.message,
            "severity": self.severity.code(),
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let Some(data) = &self.data {
            wire["data"] = Value::String(STANDARD.encode(data));
        }
        wire
    }
}

/// Accessors over the `diag` subtree (`diag.errorCodes`, `diag.log`)
#[derive(Debug, Clone)]
pub struct DeviceDiagnostic {
    error_codes: Arc<Resource>,
    log: Arc<Resource>,
    /// Held across read-modify-write of either list
    writes: Arc<Mutex<()>>,
}

impl DeviceDiagnostic {
    pub(crate) fn build(node: &Arc<Resource>) -> Result<Self> {
        Ok(Self {
            error_codes: node.add_child("errorCodes", Value::Array(Vec::new()))?,
            log: node.add_child("log", Value::Array(Vec::new()))?,
            writes: Arc::new(Mutex::new(())),
        })
    }

    pub fn error_codes(&self) -> Vec<i64> {
        match self.error_codes.to_wire() {
            Value::Array(items) => items.iter().filter_map(Value::as_i64).collect(),
            _ => Vec::new(),
        }
    }

    pub fn log_entries(&self) -> Vec<Value> {
        match self.log.to_wire() {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }

    pub(crate) fn push_error_code(&self, code: i64) -> Result<()> {
        let _guard = self.writes.lock();
        let mut codes = self.error_codes.to_wire();
        append(&mut codes, Value::from(code));
        self.error_codes.update(codes, true)
    }

    pub(crate) fn clear_error_codes(&self) -> Result<()> {
        let _guard = self.writes.lock();
        self.error_codes.update(Value::Array(Vec::new()), true)
    }

    pub(crate) fn push_log(&self, entry: &LogEntry) -> Result<()> {
        let _guard = self.writes.lock();
        let mut entries = self.log.to_wire();
        append(&mut entries, entry.to_wire());
        self.log.update(entries, true)
    }

    pub(crate) fn clear_logs(&self) -> Result<()> {
        let _guard = self.writes.lock();
        self.log.update(Value::Array(Vec::new()), true)
    }
}

fn append(list: &mut Value, item: Value) {
    match list {
        Value::Array(items) => items.push(item),
        other => *other = Value::Array(vec![item]),
    }
}
