//! Pipeline template domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::config::PipelineConfig;

/// A parameterized, reusable pipeline blueprint
///
/// `body` is an ordinary `PipelineConfig` whose text fields may contain
/// `{{param}}` placeholders, bound at instantiation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Provider this template targets
    pub provider: String,
    pub parameters: Vec<ParameterDefinition>,
    pub body: PipelineConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineTemplate {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Declared template parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<ParamValue>,
    /// When non-empty, the bound value must be one of these
    #[serde(default)]
    pub allowed_values: Vec<ParamValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Bool,
    List,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Bool => "bool",
            ParamType::List => "list",
        };
        f.write_str(name)
    }
}

/// A concrete parameter value
///
/// Serialized untagged so callers can send plain JSON scalars and arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Number(_) => ParamType::Number,
            ParamValue::String(_) => ParamType::String,
            ParamValue::List(_) => ParamType::List,
        }
    }

    /// Text form substituted into a template body
    pub fn render(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            ParamValue::String(s) => s.clone(),
            ParamValue::List(items) => items
                .iter()
                .map(ParamValue::render)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_values() {
        assert_eq!(ParamValue::from(true).render(), "true");
        assert_eq!(ParamValue::from(3.0).render(), "3");
        assert_eq!(ParamValue::from(2.5).render(), "2.5");
        assert_eq!(
            ParamValue::List(vec!["a".into(), "b".into()]).render(),
            "a,b"
        );
    }

    #[test]
    fn test_untagged_deserialization() {
        let values: Vec<ParamValue> =
            serde_json::from_str(r#"[true, 4, "main", ["x", 1]]"#).unwrap();
        assert_eq!(values[0].param_type(), ParamType::Bool);
        assert_eq!(values[1].param_type(), ParamType::Number);
        assert_eq!(values[2].param_type(), ParamType::String);
        assert_eq!(values[3].param_type(), ParamType::List);
    }
}
