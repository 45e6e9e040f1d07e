//! Template DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::config::PipelineConfig;
use crate::domain::template::{ParamValue, ParameterDefinition};

/// Request to register a new pipeline template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    pub body: PipelineConfig,
}

/// Parameter bindings for instantiating a template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstantiateTemplate {
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}
