//! Process records and upload-batch validation

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Name stored when the source cannot resolve one.
pub const UNKNOWN_NAME: &str = "unknown";

/// Column width for `hostname` and `name`.
pub const MAX_TEXT_LEN: usize = 255;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// One observed process at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub hostname: String,
    pub pid: i64,
    pub parent_pid: Option<i64>,
    pub name: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn new(hostname: impl Into<String>, pid: i64) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            parent_pid: None,
            name: UNKNOWN_NAME.to_string(),
            cpu_usage: 0.0,
            memory_usage: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_parent_pid(mut self, parent_pid: i64) -> Self {
        self.parent_pid = Some(parent_pid);
        self
    }

    pub fn with_usage(mut self, cpu_usage: f64, memory_usage: f64) -> Self {
        self.cpu_usage = cpu_usage;
        self.memory_usage = memory_usage;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replaces a blank name with [`UNKNOWN_NAME`].
    pub fn normalize(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = UNKNOWN_NAME.to_string();
        }
        self
    }

    /// Checks a typed record against the same rules applied to uploads.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.hostname.trim().is_empty() {
            push_error(&mut errors, "hostname", "This field may not be blank.");
        } else if self.hostname.chars().count() > MAX_TEXT_LEN {
            push_error(&mut errors, "hostname", too_long_message());
        }
        if self.name.chars().count() > MAX_TEXT_LEN {
            push_error(&mut errors, "name", too_long_message());
        }
        for (key, value) in [("cpu_usage", self.cpu_usage), ("memory_usage", self.memory_usage)] {
            if let Err(msg) = check_usage(value) {
                push_error(&mut errors, key, msg);
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Field name to messages, for a single record.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Structured rejection of a batch. Serializes the way a DRF list serializer
/// reports errors: either one object per submitted element, or a batch-level
/// `non_field_errors` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ValidationErrors {
    Batch { non_field_errors: Vec<String> },
    Records(Vec<FieldErrors>),
}

impl ValidationErrors {
    pub fn batch(message: impl Into<String>) -> Self {
        ValidationErrors::Batch { non_field_errors: vec![message.into()] }
    }

    /// Builds a per-record report from `(index, errors)` pairs over a batch of `len`.
    pub fn records(len: usize, failures: Vec<(usize, FieldErrors)>) -> Self {
        let mut slots = vec![FieldErrors::new(); len];
        for (index, errors) in failures {
            if let Some(slot) = slots.get_mut(index) {
                *slot = errors;
            }
        }
        ValidationErrors::Records(slots)
    }

    /// Number of rejected records (1 for a batch-level error).
    pub fn invalid_count(&self) -> usize {
        match self {
            ValidationErrors::Batch { .. } => 1,
            ValidationErrors::Records(slots) => slots.iter().filter(|e| !e.is_empty()).count(),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrors::Batch { non_field_errors } => {
                write!(f, "invalid batch: {}", non_field_errors.join("; "))
            }
            ValidationErrors::Records(_) => {
                write!(f, "{} invalid record(s) in batch", self.invalid_count())
            }
        }
    }
}

/// Parses an upload body into typed records. Every element is checked; if any
/// fails the whole batch is rejected and no record is returned.
pub fn parse_batch(body: &Value, now: DateTime<Utc>) -> Result<Vec<ProcessRecord>, ValidationErrors> {
    let items = body.as_array().ok_or_else(|| {
        ValidationErrors::batch(format!(
            "Expected a list of items but got type \"{}\".",
            json_type(body)
        ))
    })?;

    let mut records = Vec::with_capacity(items.len());
    let mut failures = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match parse_record(item, now) {
            Ok(record) => records.push(record),
            Err(errors) => failures.push((index, errors)),
        }
    }

    if failures.is_empty() {
        Ok(records)
    } else {
        Err(ValidationErrors::records(items.len(), failures))
    }
}

/// Parses one JSON object into a record, applying field defaults.
pub fn parse_record(item: &Value, now: DateTime<Utc>) -> Result<ProcessRecord, FieldErrors> {
    let mut errors = FieldErrors::new();
    let Some(obj) = item.as_object() else {
        push_error(
            &mut errors,
            "non_field_errors",
            format!("Invalid data. Expected a dictionary, but got {}.", json_type(item)),
        );
        return Err(errors);
    };

    let hostname = required_text(obj, "hostname", &mut errors);
    let pid = required_int(obj, "pid", &mut errors);
    let parent_pid = optional_int(obj, "parent_pid", &mut errors);
    let name = optional_text(obj, "name", &mut errors)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let cpu_usage = optional_usage(obj, "cpu_usage", &mut errors);
    let memory_usage = optional_usage(obj, "memory_usage", &mut errors);
    let timestamp = optional_timestamp(obj, "timestamp", &mut errors).unwrap_or(now);

    match (hostname, pid) {
        (Some(hostname), Some(pid)) if errors.is_empty() => Ok(ProcessRecord {
            hostname,
            pid,
            parent_pid,
            name,
            cpu_usage,
            memory_usage,
            timestamp,
        }),
        _ => Err(errors),
    }
}

/// Accepts RFC 3339 and naive ISO-8601 (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn push_error(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    errors.entry(field.to_string()).or_default().push(message.into());
}

fn too_long_message() -> String {
    format!("Ensure this field has no more than {} characters.", MAX_TEXT_LEN)
}

fn required_text(obj: &Map<String, Value>, key: &str, errors: &mut FieldErrors) -> Option<String> {
    match obj.get(key) {
        None => {
            push_error(errors, key, "This field is required.");
            None
        }
        Some(Value::Null) => {
            push_error(errors, key, "This field may not be null.");
            None
        }
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                push_error(errors, key, "This field may not be blank.");
                None
            } else if s.chars().count() > MAX_TEXT_LEN {
                push_error(errors, key, too_long_message());
                None
            } else {
                Some(s.to_string())
            }
        }
        Some(_) => {
            push_error(errors, key, "Not a valid string.");
            None
        }
    }
}

fn optional_text(obj: &Map<String, Value>, key: &str, errors: &mut FieldErrors) -> Option<String> {
    match field(obj, key)? {
        Value::String(s) if s.chars().count() > MAX_TEXT_LEN => {
            push_error(errors, key, too_long_message());
            None
        }
        Value::String(s) => Some(s.clone()),
        _ => {
            push_error(errors, key, "Not a valid string.");
            None
        }
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required_int(obj: &Map<String, Value>, key: &str, errors: &mut FieldErrors) -> Option<i64> {
    match obj.get(key) {
        None => {
            push_error(errors, key, "This field is required.");
            None
        }
        Some(Value::Null) => {
            push_error(errors, key, "This field may not be null.");
            None
        }
        Some(value) => {
            let parsed = as_int(value);
            if parsed.is_none() {
                push_error(errors, key, "A valid integer is required.");
            }
            parsed
        }
    }
}

fn optional_int(obj: &Map<String, Value>, key: &str, errors: &mut FieldErrors) -> Option<i64> {
    let value = field(obj, key)?;
    let parsed = as_int(value);
    if parsed.is_none() {
        push_error(errors, key, "A valid integer is required.");
    }
    parsed
}

fn check_usage(value: f64) -> Result<f64, &'static str> {
    if !value.is_finite() {
        Err("A valid number is required.")
    } else if value < 0.0 {
        Err("Ensure this value is greater than or equal to 0.")
    } else {
        Ok(value)
    }
}

fn optional_usage(obj: &Map<String, Value>, key: &str, errors: &mut FieldErrors) -> f64 {
    let Some(value) = field(obj, key) else {
        return 0.0;
    };
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed.ok_or("A valid number is required.").and_then(check_usage) {
        Ok(v) => v,
        Err(msg) => {
            push_error(errors, key, msg);
            0.0
        }
    }
}

fn optional_timestamp(
    obj: &Map<String, Value>,
    key: &str,
    errors: &mut FieldErrors,
) -> Option<DateTime<Utc>> {
    let parsed = field(obj, key)?.as_str().and_then(parse_timestamp);
    if parsed.is_none() {
        push_error(
            errors,
            key,
            "Datetime has wrong format. Use one of these formats instead: \
             YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].",
        );
    }
    parsed
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
