//! Typed values held by resource nodes

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

/// Value stored in a single resource node
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResourceValue {
    /// Unset; omitted from wire output
    #[default]
    Empty,
    Text(String),
    Number(Number),
    Bool(bool),
    /// Rendered as an RFC 3339 UTC timestamp on the wire
    Date(DateTime<Utc>),
    /// Structured value stored as-is (metadata, custom payloads)
    Json(Value),
}

impl ResourceValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResourceValue::Empty)
    }

    /// JSON representation used by `Resource::to_wire`
    pub fn to_json(&self) -> Value {
        match self {
            ResourceValue::Empty => Value::Null,
            ResourceValue::Text(s) => Value::String(s.clone()),
            ResourceValue::Number(n) => Value::Number(n.clone()),
            ResourceValue::Bool(b) => Value::Bool(*b),
            ResourceValue::Date(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ResourceValue::Json(v) => v.clone(),
        }
    }

    /// Convert an inbound JSON value, keeping dates typed when the current
    /// value is a date and the text parses as RFC 3339
    pub fn from_json(value: &Value, current: &ResourceValue) -> Self {
        match value {
            Value::Null => ResourceValue::Empty,
            Value::Bool(b) => ResourceValue::Bool(*b),
            Value::Number(n) => ResourceValue::Number(n.clone()),
            Value::String(s) => match current {
                ResourceValue::Date(_) => DateTime::parse_from_rfc3339(s)
                    .map(|d| ResourceValue::Date(d.with_timezone(&Utc)))
                    .unwrap_or_else(|_| ResourceValue::Text(s.clone())),
                _ => ResourceValue::Text(s.clone()),
            },
            other => ResourceValue::Json(other.clone()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResourceValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ResourceValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResourceValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl From<()> for ResourceValue {
    fn from(_: ()) -> Self {
        ResourceValue::Empty
    }
}

impl From<&str> for ResourceValue {
    fn from(s: &str) -> Self {
        ResourceValue::Text(s.to_string())
    }
}

impl From<String> for ResourceValue {
    fn from(s: String) -> Self {
        ResourceValue::Text(s)
    }
}

impl From<i64> for ResourceValue {
    fn from(n: i64) -> Self {
        ResourceValue::Number(n.into())
    }
}

impl From<i32> for ResourceValue {
    fn from(n: i32) -> Self {
        ResourceValue::Number(n.into())
    }
}

impl From<f64> for ResourceValue {
    fn from(n: f64) -> Self {
        // NaN and infinities have no JSON form
        Number::from_f64(n)
            .map(ResourceValue::Number)
            .unwrap_or(ResourceValue::Empty)
    }
}

impl From<bool> for ResourceValue {
    fn from(b: bool) -> Self {
        ResourceValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for ResourceValue {
    fn from(d: DateTime<Utc>) -> Self {
        ResourceValue::Date(d)
    }
}

impl From<Value> for ResourceValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => ResourceValue::Empty,
            other => ResourceValue::Json(other),
        }
    }
}

impl<T: Into<ResourceValue>> From<Option<T>> for ResourceValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ResourceValue::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_date_renders_as_utc_rfc3339() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            ResourceValue::Date(date).to_json(),
            json!("2024-03-01T12:30:00.000Z")
        );
    }

    #[test]
    fn test_from_json_keeps_date_type() {
        let current = ResourceValue::Date(Utc::now());
        let parsed = ResourceValue::from_json(&json!("2024-03-01T12:30:00Z"), &current);
        assert!(matches!(parsed, ResourceValue::Date(_)));

        let text = ResourceValue::from_json(&json!("not a date"), &current);
        assert_eq!(text, ResourceValue::Text("not a date".to_string()));
    }

    #[test]
    fn test_non_finite_float_is_empty() {
        assert!(ResourceValue::from(f64::NAN).is_empty());
        assert_eq!(ResourceValue::from(1.5).as_f64(), Some(1.5));
    }
}
