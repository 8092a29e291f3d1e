use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A versioned template for one namespace type (or the cluster-scoped
/// portion) of a tier. The object name is the templateRef.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.example.com",
    version = "v1alpha1",
    kind = "TierTemplate",
    root = "TierTemplateResource",
    plural = "tiertemplates",
    shortname = "tt",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Tier", "type":"string", "jsonPath":".spec.tierName"}"#,
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Revision", "type":"string", "jsonPath":".spec.revision"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TierTemplateSpec {
    pub tier_name: String,

    /// Namespace type, or "clusterresources" for the cluster-scoped bundle
    #[serde(rename = "type")]
    pub type_: String,

    pub revision: String,

    pub template: TemplateBody,
}

/// Renderable template body. Objects are kept as raw JSON and only the
/// renderer looks inside them.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBody {
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_objects")]
    pub objects: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<TemplateParameter>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParameter {
    pub name: String,

    /// Default value used when the caller does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default)]
    pub required: bool,
}

fn preserve_unknown_objects(_: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    }))
    .unwrap_or(schemars::schema::Schema::Bool(true))
}
