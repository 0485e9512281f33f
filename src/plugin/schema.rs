//! Declarative connector configuration schemas.
//!
//! Each provider lists its fields with explicit builders; validation checks
//! presence and JSON type and fills declared defaults.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    /// Go-style duration string: `"30s"`, `"2m"`, `"1h30m"`.
    Duration,
    Object,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigSchema {
    fields: Vec<FieldSpec>,
}

impl ConfigSchema {
    /// Schema pre-populated with the fields every connector accepts.
    pub fn common() -> Self {
        Self::default()
            .required("name", FieldType::String)
            .optional("pollingPeriod", FieldType::Duration, Some(Value::from("2m")))
            .optional("pageSize", FieldType::Integer, Some(Value::from(25)))
            .optional("offsetAdvance", FieldType::String, Some(Value::from("page_size")))
    }

    pub fn required(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            required: true,
            default: None,
        });
        self
    }

    pub fn optional(mut self, name: &str, field_type: FieldType, default: Option<Value>) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            required: false,
            default,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Validate `raw` and return it with defaults filled in.
    ///
    /// Unknown keys are kept; providers may read extra settings.
    pub fn validate(&self, raw: &Value) -> PluginResult<Value> {
        let mut object: Map<String, Value> = match raw {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => return Err(PluginError::InvalidConfig("config must be a JSON object".into())),
        };

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(PluginError::InvalidConfig(format!(
                            "missing required field {}",
                            field.name
                        )));
                    }
                    if let Some(default) = &field.default {
                        object.insert(field.name.clone(), default.clone());
                    }
                }
                Some(value) => check_type(&field.name, field.field_type, value)?,
            }
        }

        Ok(Value::Object(object))
    }
}

fn check_type(name: &str, field_type: FieldType, value: &Value) -> PluginResult<()> {
    let ok = match field_type {
        FieldType::String => value.as_str().is_some_and(|s| !s.trim().is_empty()),
        FieldType::Integer => value.as_i64().is_some(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Duration => value.as_str().is_some_and(|s| parse_duration(s).is_ok()),
    };
    if ok {
        Ok(())
    } else {
        Err(PluginError::InvalidConfig(format!(
            "field {} is not a valid {:?}",
            name, field_type
        )))
    }
}

/// Parse a `"1h30m"`-style duration. Units: `ms`, `s`, `m`, `h`.
pub fn parse_duration(input: &str) -> PluginResult<Duration> {
    let invalid = || PluginError::InvalidConfig(format!("invalid duration: {}", input));
    let mut total = Duration::ZERO;
    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    while !rest.is_empty() {
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(|b| b.is_ascii_alphabetic()).count();
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(invalid()),
        };
        total += part;
        rest = &rest[unit_len..];
    }

    Ok(total)
}
