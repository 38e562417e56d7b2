use serde_json::Value;

/// A JSON field that may be absent, explicitly `null`, or a string.
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

impl NullableValue {
    /// `None` leaves the column alone, `Some(None)` clears it.
    pub fn into_update(self) -> Option<Option<String>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::String(value) => Some(Some(value)),
        }
    }
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}
