//! Turn a template body and parameters into concrete objects

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use serde_json::Value;

use super::resolver::TierTemplate;
use crate::controller::error::{Error, Result};

/// Which part of a render the caller wants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Only `Namespace` objects
    NamespaceOnly,
    /// Everything except `Namespace` objects
    AllButNamespaces,
    All,
}

impl ScopeFilter {
    fn keeps(self, kind: &str) -> bool {
        match self {
            ScopeFilter::NamespaceOnly => kind == "Namespace",
            ScopeFilter::AllButNamespaces => kind != "Namespace",
            ScopeFilter::All => true,
        }
    }
}

pub trait Renderer: Send + Sync {
    fn render(
        &self,
        template: &TierTemplate,
        params: &BTreeMap<String, String>,
        filter: ScopeFilter,
    ) -> Result<Vec<DynamicObject>>;
}

/// Apply order of a kind. Objects that others depend on come first.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 1,
        "Role" => 2,
        "ClusterRole" => 3,
        "LimitRange" => 4,
        "ResourceQuota" => 5,
        "Secret" => 6,
        "ServiceAccount" => 7,
        "Service" => 8,
        "RoleBinding" => 9,
        "ClusterRoleBinding" => 10,
        "ConfigMap" => 11,
        "Deployment" => 12,
        _ => u8::MAX,
    }
}

/// Substitutes `${NAME}` parameter references in every string value
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateProcessor;

impl TemplateProcessor {
    pub fn new() -> Self {
        Self
    }
}

fn render_error(template: &TierTemplate, reason: impl Into<String>) -> Error {
    Error::RenderError {
        template: template.template_ref.clone(),
        reason: reason.into(),
    }
}

/// Caller values win over declared defaults
fn parameter_values(
    template: &TierTemplate,
    params: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut values = params.clone();
    for param in &template.body.parameters {
        if values.contains_key(&param.name) {
            continue;
        }
        match &param.value {
            Some(value) => {
                values.insert(param.name.clone(), value.clone());
            }
            None if param.required => {
                return Err(render_error(
                    template,
                    format!("parameter {} is required", param.name),
                ));
            }
            None => {
                values.insert(param.name.clone(), String::new());
            }
        }
    }
    Ok(values)
}

fn substitute_str(input: &str, values: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated parameter reference in {input:?}"))?;
        let name = &after[..end];
        let value = values
            .get(name)
            .ok_or_else(|| format!("parameter {name} is not defined"))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn substitute(value: &mut Value, values: &BTreeMap<String, String>) -> Result<(), String> {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute_str(s, values)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, values)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, values)?;
            }
        }
        _ => {}
    }
    Ok(())
}

impl Renderer for TemplateProcessor {
    fn render(
        &self,
        template: &TierTemplate,
        params: &BTreeMap<String, String>,
        filter: ScopeFilter,
    ) -> Result<Vec<DynamicObject>> {
        let values = parameter_values(template, params)?;
        let mut objects = Vec::with_capacity(template.body.objects.len());

        for raw in &template.body.objects {
            let mut raw = raw.clone();
            substitute(&mut raw, &values).map_err(|reason| render_error(template, reason))?;
            let obj: DynamicObject = serde_json::from_value(raw)
                .map_err(|e| render_error(template, format!("invalid object: {e}")))?;

            let kind = match &obj.types {
                Some(types) if !types.kind.is_empty() && !types.api_version.is_empty() => {
                    types.kind.clone()
                }
                _ => return Err(render_error(template, "object without apiVersion or kind")),
            };
            if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
                return Err(render_error(template, format!("{kind} without a name")));
            }
            if filter.keeps(&kind) {
                objects.push(obj);
            }
        }

        // Stable, so template order is kept within a kind
        objects.sort_by_key(|o| {
            kind_priority(o.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default())
        });
        Ok(objects)
    }
}
