use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// TenantEnvironment declares the namespaces and cluster-scoped resources
/// a tenant should have, expressed as references to tier templates.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.example.com",
    version = "v1alpha1",
    kind = "TenantEnvironment",
    plural = "tenantenvironments",
    shortname = "tenv",
    namespaced,
    status = "TenantEnvironmentStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Tier", "type":"string", "jsonPath":".spec.tierName"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantEnvironmentSpec {
    /// Name of the tier the templates belong to
    pub tier_name: String,

    /// Namespaces to provision, scanned in order
    #[serde(default)]
    pub namespaces: Vec<NamespaceTemplateRef>,

    /// Cluster-scoped resources of the tier (absent when the tier has none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_resources: Option<ClusterResourcesRef>,
}

/// A namespace type paired with the template that renders it
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceTemplateRef {
    /// Namespace type, e.g. "dev" or "code"
    #[serde(rename = "type")]
    pub type_: String,

    /// Name of the TierTemplate (encodes tier, type and revision)
    pub template_ref: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourcesRef {
    pub template_ref: String,
}

/// Status of a TenantEnvironment
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantEnvironmentStatus {
    /// Conditions (a single Ready entry)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Namespaces that exist for the tenant, sorted by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioned_namespaces: Vec<ProvisionedNamespace>,

    /// Template refs the tenant was last fully provisioned with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<RecordedRevisions>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedNamespace {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRevisions {
    /// templateRef per namespace type
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_resources: Option<String>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Whether two conditions carry the same content, ignoring timestamps
    pub fn same_content(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl TenantEnvironment {
    /// Conditions recorded on the status, empty when no status exists yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// The current Ready condition, if any
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == "Ready")
    }
}
