//! Telemetry spans: the records agents append to and read from the shared log.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Span attributes, keyed by dotted attribute name.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Returns the current wall clock time as fractional seconds since the epoch.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    /// Returns the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a float, converting integers and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    /// Returns the value as a bool. Accepts `"true"`/`"false"` strings.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Str(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Float(x) => write!(f, "{x}"),
            AttrValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<&String> for AttrValue {
    fn from(s: &String) -> Self {
        AttrValue::Str(s.clone())
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<i32> for AttrValue {
    fn from(i: i32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<u32> for AttrValue {
    fn from(i: u32) -> Self {
        AttrValue::Int(i64::from(i))
    }
}

impl From<usize> for AttrValue {
    fn from(i: usize) -> Self {
        AttrValue::Int(i as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(x: f64) -> Self {
        AttrValue::Float(x)
    }
}

/// Custom deserializer that keeps attribute maps scalar.
///
/// Exporters sometimes write lists or nested objects as attribute values
/// (e.g. `"blockers": ["api down"]`). Those are kept as their JSON text
/// rather than rejecting the whole span. `null` values are dropped.
fn deserialize_attributes<'de, D>(deserializer: D) -> std::result::Result<Attributes, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    let mut attributes = Attributes::new();
    for (key, value) in raw.unwrap_or_default() {
        let value = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(b) => AttrValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => AttrValue::Str(s),
            other => AttrValue::Str(other.to_string()),
        };
        attributes.insert(key, value);
    }
    Ok(attributes)
}

/// Completion status of a span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Ok,
    Error {
        message: Option<String>,
    },
}

impl SpanStatus {
    /// Creates an error status with a message.
    pub fn error(message: impl Into<String>) -> Self {
        SpanStatus::Error {
            message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error { .. })
    }
}

impl Serialize for SpanStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SpanStatus::Ok => serializer.serialize_str("ok"),
            SpanStatus::Error { message: None } => serializer.serialize_str("error"),
            SpanStatus::Error {
                message: Some(message),
            } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("code", "error")?;
                map.serialize_entry("message", message)?;
                map.end()
            }
        }
    }
}

fn status_from_code<E: de::Error>(code: &str, message: Option<String>) -> std::result::Result<SpanStatus, E> {
    match code.to_ascii_lowercase().as_str() {
        "ok" | "unset" => Ok(SpanStatus::Ok),
        "error" => Ok(SpanStatus::Error { message }),
        other => Err(E::custom(format!("unknown span status '{other}'"))),
    }
}

impl<'de> Deserialize<'de> for SpanStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StatusVisitor;

        impl<'de> Visitor<'de> for StatusVisitor {
            type Value = SpanStatus;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a status string or {code, message} object")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<SpanStatus, E> {
                status_from_code(v, None)
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<SpanStatus, E> {
                Ok(SpanStatus::Ok)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<SpanStatus, A::Error> {
                let mut code: Option<String> = None;
                let mut message: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "code" | "status_code" => code = Some(map.next_value()?),
                        "message" | "description" => message = map.next_value()?,
                        _ => {
                            map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }
                status_from_code(code.as_deref().unwrap_or("error"), message)
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

/// One coordination event in the shared log.
///
/// Serialized as a single JSON object per line. Reading is lenient about the
/// identifiers (`id` and `parent_span_id` are accepted as aliases, and missing
/// ids default to empty) so seed lines written by hand or by other exporters
/// still route. `name` is the only mandatory field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Dot-namespaced routing name, e.g. `governance.motion.open`.
    pub name: String,

    #[serde(default, alias = "id")]
    pub span_id: String,

    #[serde(default)]
    pub trace_id: String,

    /// The span this one was caused by.
    #[serde(default, alias = "parent_span_id", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,

    #[serde(default, deserialize_with = "deserialize_attributes")]
    pub attributes: Attributes,

    #[serde(default)]
    pub status: SpanStatus,
}

impl Span {
    /// Creates a root span with fresh identifiers and the current timestamp.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span_id: fresh_id(),
            trace_id: fresh_id(),
            parent_id: None,
            timestamp: now_seconds(),
            duration_ms: None,
            attributes: Attributes::new(),
            status: SpanStatus::Ok,
        }
    }

    /// Makes this span a child of `cause`: links `parent_id` and inherits the trace.
    #[must_use]
    pub fn child_of(mut self, cause: &Span) -> Self {
        self.parent_id = Some(cause.span_id.clone());
        if !cause.trace_id.is_empty() {
            self.trace_id = cause.trace_id.clone();
        }
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Gets an attribute value.
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    /// Gets an attribute rendered as text, whatever its scalar type.
    pub fn attr_string(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(ToString::to_string)
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Parses one log line into a span.
    pub fn from_line(line: &str) -> Result<Self> {
        let span: Span = serde_json::from_str(line)?;
        if span.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }
        Ok(span)
    }

    /// Encodes the span as one log line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_span_has_fresh_ids() {
        let a = Span::new("ping.request");
        let b = Span::new("ping.request");
        assert!(!a.span_id.is_empty());
        assert_ne!(a.span_id, b.span_id);
        assert_ne!(a.trace_id, b.trace_id);
        assert!(a.parent_id.is_none());
        assert!(a.timestamp > 0.0);
    }

    #[test]
    fn test_child_of_links_parent_and_trace() {
        let seed = Span::new("governance.motion.open");
        let child = Span::new("governance.motion.vote").child_of(&seed);
        assert_eq!(child.parent_id.as_deref(), Some(seed.span_id.as_str()));
        assert_eq!(child.trace_id, seed.trace_id);
    }

    #[test]
    fn test_parses_exporter_format() {
        let line = r#"{"name":"swarmsh.roberts.open","trace_id":"abc","span_id":"def","parent_span_id":null,"timestamp":1700000000.5,"duration_ms":1.5,"attributes":{"motion_id":"m1","votes":5,"ratio":0.5,"passed":true},"status":"UNSET","events":[]}"#;
        let span = Span::from_line(line).unwrap();
        assert_eq!(span.name, "swarmsh.roberts.open");
        assert_eq!(span.span_id, "def");
        assert!(span.parent_id.is_none());
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(span.attr("motion_id"), Some(&AttrValue::Str("m1".into())));
        assert_eq!(span.attr("votes"), Some(&AttrValue::Int(5)));
        assert_eq!(span.attr("ratio"), Some(&AttrValue::Float(0.5)));
        assert_eq!(span.attr("passed"), Some(&AttrValue::Bool(true)));
    }

    #[test]
    fn test_minimal_seed_line() {
        let span = Span::from_line(r#"{"name":"ping.request","id":"s1"}"#).unwrap();
        assert_eq!(span.span_id, "s1");
        assert!(span.trace_id.is_empty());
        assert!(span.attributes.is_empty());
    }

    #[test]
    fn test_non_scalar_attributes_kept_as_json_text() {
        let line = r#"{"name":"scrum.sprint.daily","attributes":{"blockers":["api down"],"meta":{"a":1},"gone":null}}"#;
        let span = Span::from_line(line).unwrap();
        assert_eq!(span.attr_string("blockers").as_deref(), Some(r#"["api down"]"#));
        assert_eq!(span.attr_string("meta").as_deref(), Some(r#"{"a":1}"#));
        assert!(span.attr("gone").is_none());
    }

    #[test]
    fn test_rejects_missing_or_empty_name() {
        assert!(Span::from_line(r#"{"id":"x"}"#).is_err());
        assert!(matches!(
            Span::from_line(r#"{"name":"  "}"#),
            Err(Error::EmptyName)
        ));
        assert!(Span::from_line("not json").is_err());
    }

    #[test]
    fn test_error_status_round_trips_message() {
        let span = Span::new("cli.execute.failed").with_status(SpanStatus::error("exit 2"));
        let line = span.to_line().unwrap();
        assert!(line.contains(r#""code":"error""#));
        let back = Span::from_line(&line).unwrap();
        assert_eq!(back.status, SpanStatus::error("exit 2"));
        assert!(back.is_error());
    }

    #[test]
    fn test_attr_value_conversions() {
        assert_eq!(AttrValue::from("5.2").as_f64(), Some(5.2));
        assert_eq!(AttrValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(AttrValue::from("true").as_bool(), Some(true));
        assert_eq!(AttrValue::Int(1).as_bool(), None);
        assert_eq!(AttrValue::Float(0.25).to_string(), "0.25");
    }
}
