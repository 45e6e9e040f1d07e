//! Template Catalog
//!
//! Stores parameterized pipeline templates and resolves a template plus
//! parameter bindings into a concrete `PipelineConfig`. Resolution is pure:
//! it never touches storage or a provider, and reports every violation at
//! once.

use chrono::Utc;
use conduit_core::domain::config::PipelineConfig;
use conduit_core::domain::template::{ParamValue, ParameterDefinition, PipelineTemplate};
use conduit_core::dto::template::CreateTemplate;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::repository::TemplateRepository;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("valid placeholder regex")
});

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid parameter name regex"));

pub struct TemplateCatalog {
    templates: Arc<dyn TemplateRepository>,
}

impl TemplateCatalog {
    pub fn new(templates: Arc<dyn TemplateRepository>) -> Self {
        Self { templates }
    }

    pub async fn list(&self, provider: Option<&str>) -> ServiceResult<Vec<PipelineTemplate>> {
        Ok(self.templates.list(provider).await?)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<PipelineTemplate> {
        self.templates
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("template {id}")))
    }

    pub async fn create(&self, req: CreateTemplate) -> ServiceResult<PipelineTemplate> {
        let violations = validate_template(&req);
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        let now = Utc::now();
        let template = PipelineTemplate {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            provider: req.provider,
            parameters: req.parameters,
            body: req.body,
            created_at: now,
            updated_at: now,
        };
        self.templates.insert(&template).await?;

        tracing::info!("Template created: {} ({})", template.name, template.id);
        Ok(template)
    }

    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        if !self.templates.delete(id).await? {
            return Err(ServiceError::not_found(format!("template {id}")));
        }
        tracing::info!("Template deleted: {}", id);
        Ok(())
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Binds `params` against the template's schema and substitutes them into
/// its body
pub fn resolve(
    template: &PipelineTemplate,
    params: &BTreeMap<String, ParamValue>,
) -> ServiceResult<PipelineConfig> {
    let mut violations = Vec::new();
    let mut bound: BTreeMap<&str, String> = BTreeMap::new();

    for name in params.keys() {
        if template.parameter(name).is_none() {
            violations.push(format!("unknown parameter '{name}'"));
        }
    }

    for definition in &template.parameters {
        match params.get(&definition.name) {
            Some(value) => match check_value(definition, value) {
                Ok(()) => {
                    bound.insert(&definition.name, value.render());
                }
                Err(violation) => violations.push(violation),
            },
            None if definition.required => {
                violations.push(format!("missing required parameter '{}'", definition.name));
            }
            None => {
                let rendered = definition
                    .default
                    .as_ref()
                    .map(ParamValue::render)
                    .unwrap_or_default();
                bound.insert(&definition.name, rendered);
            }
        }
    }

    let mut config = template.body.clone();
    let mut undeclared = Vec::new();
    config.for_each_text_mut(&mut |text: &mut String| {
        if !text.contains("{{") {
            return;
        }
        let replaced = PLACEHOLDER.replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            match bound.get(name) {
                Some(value) => value.clone(),
                None => {
                    if template.parameter(name).is_none() {
                        undeclared.push(name.to_string());
                    }
                    String::new()
                }
            }
        });
        *text = replaced.into_owned();
    });

    undeclared.sort();
    undeclared.dedup();
    violations.extend(
        undeclared
            .into_iter()
            .map(|name| format!("template references undeclared parameter '{name}'")),
    );

    if violations.is_empty() {
        Ok(config)
    } else {
        Err(ServiceError::Validation(violations))
    }
}

fn check_value(definition: &ParameterDefinition, value: &ParamValue) -> Result<(), String> {
    if value.param_type() != definition.param_type {
        return Err(format!(
            "parameter '{}' expects {}, got {}",
            definition.name,
            definition.param_type,
            value.param_type()
        ));
    }
    if !definition.allowed_values.is_empty() && !definition.allowed_values.contains(value) {
        let allowed: Vec<String> = definition
            .allowed_values
            .iter()
            .map(ParamValue::render)
            .collect();
        return Err(format!(
            "parameter '{}' must be one of [{}], got '{}'",
            definition.name,
            allowed.join(", "),
            value.render()
        ));
    }
    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_template(req: &CreateTemplate) -> Vec<String> {
    let mut violations = Vec::new();

    if req.name.trim().is_empty() {
        violations.push("Template name cannot be empty".to_string());
    } else if req.name.len() > 255 {
        violations.push("Template name is too long (max 255 characters)".to_string());
    }

    if req.provider.trim().is_empty() {
        violations.push("Template provider cannot be empty".to_string());
    }

    if req.body.stages.is_empty() {
        violations.push("Template body must define at least one stage".to_string());
    }

    let mut seen = HashSet::new();
    for definition in &req.parameters {
        let name = &definition.name;
        if !PARAM_NAME.is_match(name) {
            violations.push(format!("parameter name '{name}' is not a valid identifier"));
        }
        if !seen.insert(name.as_str()) {
            violations.push(format!("parameter '{name}' is declared more than once"));
        }

        for allowed in &definition.allowed_values {
            if allowed.param_type() != definition.param_type {
                violations.push(format!(
                    "allowed value '{}' of parameter '{}' is not a {}",
                    allowed.render(),
                    name,
                    definition.param_type
                ));
            }
        }

        if let Some(default) = &definition.default {
            if let Err(violation) = check_value(definition, default) {
                violations.push(format!("default: {violation}"));
            }
        }
    }

    let mut body = req.body.clone();
    let mut undeclared = Vec::new();
    body.for_each_text_mut(&mut |text: &mut String| {
        for caps in PLACEHOLDER.captures_iter(text) {
            let name = &caps[1];
            if !req.parameters.iter().any(|p| p.name == name) {
                undeclared.push(name.to_string());
            }
        }
    });
    undeclared.sort();
    undeclared.dedup();
    violations.extend(
        undeclared
            .into_iter()
            .map(|name| format!("template references undeclared parameter '{name}'")),
    );

    violations
}
