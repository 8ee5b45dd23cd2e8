//! Typed per-tool configuration schema.
//!
//! Tool configuration is a closed set of field kinds so that rendering and
//! validation can match exhaustively instead of probing open JSON objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Values keyed by [`ConfigField::key`].
pub type ConfigValues = BTreeMap<String, ConfigValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Select {
        options: Vec<SelectOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
    },
    Boolean {
        #[serde(default)]
        default: bool,
    },
}

impl FieldKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Text { .. } => "text",
            Self::Number { .. } => "number",
            Self::Boolean { .. } => "boolean",
        }
    }

    #[must_use]
    pub fn default_value(&self) -> Option<ConfigValue> {
        match self {
            Self::Select { default, .. } | Self::Text { default, .. } => {
                default.clone().map(ConfigValue::Text)
            }
            Self::Number { default, .. } => default.map(ConfigValue::Number),
            Self::Boolean { default } => Some(ConfigValue::Boolean(*default)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub kind: FieldKind,
}

/// One configured value. Untagged on the wire: `true`, `3.5`, `"daily"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ToolConfigSchema {
    #[must_use]
    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|field| field.key == key)
    }

    /// Every field that declares a default, keyed by field key.
    #[must_use]
    pub fn defaults(&self) -> ConfigValues {
        self.fields
            .iter()
            .filter_map(|field| {
                field
                    .kind
                    .default_value()
                    .map(|value| (field.key.clone(), value))
            })
            .collect()
    }

    /// Defaults overlaid with explicit `values`.
    #[must_use]
    pub fn resolve(&self, values: &ConfigValues) -> ConfigValues {
        let mut resolved = self.defaults();
        resolved.extend(values.iter().map(|(key, value)| (key.clone(), value.clone())));
        resolved
    }

    pub fn validate(&self, values: &ConfigValues) -> Result<(), ChatError> {
        for key in values.keys() {
            if self.field(key).is_none() {
                return Err(ChatError::validation(format!("unknown config key '{key}'")));
            }
        }

        for field in &self.fields {
            match values.get(&field.key) {
                Some(value) => validate_value(field, value)?,
                None if field.required && field.kind.default_value().is_none() => {
                    return Err(ChatError::validation(format!(
                        "config key '{}' is required",
                        field.key
                    )));
                }
                None => {}
            }
        }

        Ok(())
    }
}

fn validate_value(field: &ConfigField, value: &ConfigValue) -> Result<(), ChatError> {
    let mismatch = || {
        ChatError::validation(format!(
            "config key '{}' expects a {} value, got {}",
            field.key,
            field.kind.name(),
            value.kind_name()
        ))
    };

    match (&field.kind, value) {
        (FieldKind::Select { options, .. }, ConfigValue::Text(selected)) => {
            if options.iter().any(|option| &option.value == selected) {
                Ok(())
            } else {
                Err(ChatError::validation(format!(
                    "config key '{}' does not allow option '{selected}'",
                    field.key
                )))
            }
        }
        (FieldKind::Text { .. }, ConfigValue::Text(_)) => Ok(()),
        (FieldKind::Number { min, max, .. }, ConfigValue::Number(number)) => {
            let below = min.is_some_and(|min| *number < min);
            let above = max.is_some_and(|max| *number > max);
            if number.is_nan() || below || above {
                Err(ChatError::validation(format!(
                    "config key '{}' is out of range: {number}",
                    field.key
                )))
            } else {
                Ok(())
            }
        }
        (FieldKind::Boolean { .. }, ConfigValue::Boolean(_)) => Ok(()),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn quote_schema() -> ToolConfigSchema {
        serde_json::from_value(json!([
            {
                "key": "period",
                "label": "Period",
                "kind": {
                    "type": "select",
                    "options": [{"value": "daily"}, {"value": "weekly"}],
                    "default": "daily"
                }
            },
            {
                "key": "lookback",
                "kind": {"type": "number", "min": 1.0, "max": 365.0}
            },
            {
                "key": "adjusted",
                "kind": {"type": "boolean", "default": true}
            },
            {
                "key": "api_key",
                "required": true,
                "kind": {"type": "text", "placeholder": "key"}
            }
        ]))
        .expect("schema should deserialize")
    }

    fn values(pairs: &[(&str, ConfigValue)]) -> ConfigValues {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn defaults_cover_fields_with_declared_defaults() {
        let defaults = quote_schema().defaults();
        assert_eq!(
            defaults.get("period"),
            Some(&ConfigValue::Text("daily".to_string()))
        );
        assert_eq!(defaults.get("adjusted"), Some(&ConfigValue::Boolean(true)));
        assert!(!defaults.contains_key("lookback"));
    }

    #[test]
    fn validate_accepts_well_typed_values() {
        let schema = quote_schema();
        let values = values(&[
            ("period", ConfigValue::Text("weekly".to_string())),
            ("lookback", ConfigValue::Number(30.0)),
            ("api_key", ConfigValue::Text("secret".to_string())),
        ]);
        schema.validate(&values).expect("values should validate");
    }

    #[test]
    fn validate_rejects_unknown_keys_and_missing_required() {
        let schema = quote_schema();
        let error = schema
            .validate(&values(&[("bogus", ConfigValue::Boolean(true))]))
            .expect_err("unknown key must fail");
        assert!(error.to_string().contains("unknown config key 'bogus'"));

        let error = schema
            .validate(&ConfigValues::new())
            .expect_err("missing required key must fail");
        assert!(error.to_string().contains("'api_key' is required"));
    }

    #[test]
    fn validate_rejects_kind_mismatch_option_and_range() {
        let schema = quote_schema();
        let base = [("api_key", ConfigValue::Text("k".to_string()))];

        let mut bad_kind = values(&base);
        bad_kind.insert("adjusted".to_string(), ConfigValue::Text("yes".to_string()));
        assert!(schema.validate(&bad_kind).is_err());

        let mut bad_option = values(&base);
        bad_option.insert("period".to_string(), ConfigValue::Text("hourly".to_string()));
        assert!(schema.validate(&bad_option).is_err());

        let mut out_of_range = values(&base);
        out_of_range.insert("lookback".to_string(), ConfigValue::Number(400.0));
        assert!(schema.validate(&out_of_range).is_err());
    }

    #[test]
    fn config_values_are_untagged_on_the_wire() {
        let parsed: ConfigValues =
            serde_json::from_value(json!({"a": true, "b": 2.5, "c": "x"})).expect("values");
        assert_eq!(parsed["a"], ConfigValue::Boolean(true));
        assert_eq!(parsed["b"], ConfigValue::Number(2.5));
        assert_eq!(parsed["c"], ConfigValue::Text("x".to_string()));
    }

    #[test]
    fn resolve_overlays_explicit_values_on_defaults() {
        let schema = quote_schema();
        let resolved = schema.resolve(&values(&[("adjusted", ConfigValue::Boolean(false))]));
        assert_eq!(resolved["adjusted"], ConfigValue::Boolean(false));
        assert_eq!(resolved["period"], ConfigValue::Text("daily".to_string()));
    }
}
