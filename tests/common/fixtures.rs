//! Test fixtures for TenantEnvironment and TierTemplate resources
//!
//! The `basic` tier has three namespace templates and a cluster-scoped bundle:
//! - `basic-dev-v1`: Namespace, Role and RoleBinding
//! - `basic-dev-v2`: Namespace, Role and ConfigMap (the RoleBinding is gone)
//! - `basic-code-v1`: Namespace and Role
//! - `basic-clusterresources-v1` / `-v2`: ClusterResourceQuota and ClusterRoleBinding
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let harness = Harness::new();
//! harness.seed(TenantBuilder::new("john").namespace("dev", "basic-dev-v1").build());
//! let outcome = harness.converge("john").await;
//! ```

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::core::ObjectMeta;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use tenant_operator::EngineConfig;
use tenant_operator::controller::{
    Context, Outcome, ReadyReason, Result, TenantReconciler, ready_reason,
};
use tenant_operator::crd::{
    ClusterResourcesRef, Condition, NamespaceTemplateRef, TemplateBody, TemplateParameter,
    TenantEnvironment, TenantEnvironmentSpec, TenantEnvironmentStatus, TierTemplateResource,
    TierTemplateSpec,
};
use tenant_operator::resources::namespace_gvk;
use tenant_operator::store::InMemoryStore;
use tenant_operator::templates::{StaticAccessor, StaticTemplateAuthority};

/// Namespace holding the TenantEnvironment records
pub const TENANTS_NS: &str = "tenants";

/// Namespace of the host cluster holding the TierTemplates
pub const HOST_NS: &str = "tenant-host";

// =============================================================================
// TenantEnvironment Builder
// =============================================================================

/// Builder for TenantEnvironment test fixtures
pub struct TenantBuilder {
    tenant: TenantEnvironment,
}

impl TenantBuilder {
    pub fn new(name: &str) -> Self {
        let tenant = TenantEnvironment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(TENANTS_NS.to_string()),
                uid: Some(format!("uid-{name}")),
                generation: Some(1),
                ..Default::default()
            },
            spec: TenantEnvironmentSpec {
                tier_name: "basic".to_string(),
                namespaces: vec![],
                cluster_resources: None,
            },
            status: None,
        };
        Self { tenant }
    }

    pub fn namespace(mut self, type_: &str, template_ref: &str) -> Self {
        self.tenant.spec.namespaces.push(NamespaceTemplateRef {
            type_: type_.to_string(),
            template_ref: template_ref.to_string(),
        });
        self
    }

    pub fn cluster_resources(mut self, template_ref: &str) -> Self {
        self.tenant.spec.cluster_resources = Some(ClusterResourcesRef {
            template_ref: template_ref.to_string(),
        });
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.tenant
            .annotations_mut()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_finalizer(mut self) -> Self {
        self.tenant.metadata.finalizers =
            Some(vec![tenant_operator::FINALIZER.to_string()]);
        self
    }

    /// Deletion requested `ago` before now
    pub fn deleting_since(mut self, ago: ChronoDuration) -> Self {
        self.tenant.metadata.deletion_timestamp = Some(Time(Utc::now() - ago));
        self
    }

    /// Start from a Ready condition with the given reason
    pub fn with_ready(mut self, reason: ReadyReason) -> Self {
        let status = if reason.is_ready() { "True" } else { "False" };
        self.tenant.status = Some(TenantEnvironmentStatus {
            conditions: vec![Condition {
                type_: "Ready".to_string(),
                status: status.to_string(),
                reason: reason.as_str().to_string(),
                message: String::new(),
                last_transition_time: "2024-01-01T00:00:00Z".to_string(),
                observed_generation: Some(1),
            }],
            ..Default::default()
        });
        self
    }

    pub fn build(self) -> TenantEnvironment {
        self.tenant
    }
}

// =============================================================================
// TierTemplate fixtures
// =============================================================================

pub fn tier_template(
    name: &str,
    type_: &str,
    revision: &str,
    objects: Vec<Value>,
) -> TierTemplateResource {
    let mut template = TierTemplateResource::new(
        name,
        TierTemplateSpec {
            tier_name: "basic".to_string(),
            type_: type_.to_string(),
            revision: revision.to_string(),
            template: TemplateBody {
                objects,
                parameters: vec![TemplateParameter {
                    name: "USERNAME".to_string(),
                    value: None,
                    required: true,
                }],
            },
        },
    );
    template.metadata.namespace = Some(HOST_NS.to_string());
    template
}

pub fn namespace_object(suffix: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": format!("${{USERNAME}}-{suffix}") }
    })
}

fn role(suffix: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "Role",
        "metadata": { "name": "tenant-edit", "namespace": format!("${{USERNAME}}-{suffix}") },
        "rules": [{ "apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list"] }]
    })
}

fn role_binding(suffix: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "RoleBinding",
        "metadata": { "name": "user-edit", "namespace": format!("${{USERNAME}}-{suffix}") },
        "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "Role", "name": "tenant-edit" },
        "subjects": [{ "kind": "User", "name": "${USERNAME}" }]
    })
}

fn config_map(suffix: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "limits", "namespace": format!("${{USERNAME}}-{suffix}") },
        "data": { "cpu": "2" }
    })
}

pub fn basic_dev_v1() -> TierTemplateResource {
    tier_template(
        "basic-dev-v1",
        "dev",
        "v1",
        vec![namespace_object("dev"), role("dev"), role_binding("dev")],
    )
}

pub fn basic_dev_v2() -> TierTemplateResource {
    tier_template(
        "basic-dev-v2",
        "dev",
        "v2",
        vec![namespace_object("dev"), role("dev"), config_map("dev")],
    )
}

pub fn basic_code_v1() -> TierTemplateResource {
    tier_template(
        "basic-code-v1",
        "code",
        "v1",
        vec![namespace_object("code"), role("code")],
    )
}

pub fn cluster_quota(cpu: &str) -> Value {
    json!({
        "apiVersion": "quota.openshift.io/v1",
        "kind": "ClusterResourceQuota",
        "metadata": { "name": "for-${USERNAME}" },
        "spec": { "quota": { "hard": { "limits.cpu": cpu } } }
    })
}

pub fn cluster_role_binding() -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": { "name": "${USERNAME}-view" },
        "roleRef": { "apiGroup": "rbac.authorization.k8s.io", "kind": "ClusterRole", "name": "view" },
        "subjects": [{ "kind": "User", "name": "${USERNAME}" }]
    })
}

pub fn priority_class() -> Value {
    json!({
        "apiVersion": "scheduling.k8s.io/v1",
        "kind": "PriorityClass",
        "metadata": { "name": "${USERNAME}-batch" },
        "value": 1000
    })
}

/// Tie a template object to a feature
pub fn with_feature(mut object: Value, feature: &str) -> Value {
    object["metadata"]["annotations"] = json!({ "tenancy.example.com/feature": feature });
    object
}

pub fn basic_cluster_resources_v1() -> TierTemplateResource {
    tier_template(
        "basic-clusterresources-v1",
        "clusterresources",
        "v1",
        vec![cluster_quota("4"), cluster_role_binding()],
    )
}

/// Raises the quota and drops the ClusterRoleBinding
pub fn basic_cluster_resources_v2() -> TierTemplateResource {
    tier_template(
        "basic-clusterresources-v2",
        "clusterresources",
        "v2",
        vec![cluster_quota("8")],
    )
}

pub fn all_templates() -> Vec<TierTemplateResource> {
    vec![
        basic_dev_v1(),
        basic_dev_v2(),
        basic_code_v1(),
        basic_cluster_resources_v1(),
        basic_cluster_resources_v2(),
    ]
}

pub fn quota_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("quota.openshift.io", "v1", "ClusterResourceQuota")
}

pub fn cluster_role_binding_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding")
}

pub fn priority_class_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("scheduling.k8s.io", "v1", "PriorityClass")
}

pub fn role_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "Role")
}

pub fn role_binding_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "RoleBinding")
}

pub fn config_map_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "ConfigMap")
}

// =============================================================================
// Engine harness
// =============================================================================

/// An engine wired to an in-memory store and template authority
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub authority: Arc<StaticTemplateAuthority>,
    pub ctx: Context,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let authority = Arc::new(StaticTemplateAuthority::with_templates(all_templates()));
        let accessor = Arc::new(StaticAccessor::new(authority.clone()));
        let config = EngineConfig {
            host_namespace: HOST_NS.to_string(),
            ..Default::default()
        };
        let ctx = Context::new(store.clone(), accessor, config, None);
        Self {
            store,
            authority,
            ctx,
        }
    }

    pub fn seed(&self, tenant: TenantEnvironment) {
        self.store.insert_tenant(tenant);
    }

    pub fn tenant(&self, name: &str) -> Option<TenantEnvironment> {
        self.store.tenant(TENANTS_NS, name)
    }

    /// Replace the desired state of a stored tenant, as a user edit would
    pub fn edit(&self, name: &str, edit: impl FnOnce(&mut TenantEnvironmentSpec)) {
        let mut tenant = self.tenant(name).expect("tenant exists");
        edit(&mut tenant.spec);
        tenant.metadata.generation = tenant.metadata.generation.map(|g| g + 1);
        self.store.insert_tenant(tenant);
    }

    /// Set or remove an annotation of a stored tenant
    pub fn annotate(&self, name: &str, key: &str, value: Option<&str>) {
        let mut tenant = self.tenant(name).expect("tenant exists");
        match value {
            Some(value) => {
                tenant
                    .annotations_mut()
                    .insert(key.to_string(), value.to_string());
            }
            None => {
                tenant.annotations_mut().remove(key);
            }
        }
        self.store.insert_tenant(tenant);
    }

    /// Request deletion of a stored tenant
    pub fn request_deletion(&self, name: &str, ago: ChronoDuration) {
        let mut tenant = self.tenant(name).expect("tenant exists");
        tenant.metadata.deletion_timestamp = Some(Time(Utc::now() - ago));
        self.store.insert_tenant(tenant);
    }

    /// Run a single pass over the stored tenant
    pub async fn pass(&self, name: &str) -> Result<Outcome> {
        let mut tenant = self.tenant(name).expect("tenant exists");
        TenantReconciler::new(&self.ctx)
            .reconcile_tenant(&mut tenant)
            .await
    }

    /// Run passes until the tenant converges or is removed
    pub async fn converge(&self, name: &str) -> Outcome {
        for _ in 0..50 {
            let outcome = self.pass(name).await.expect("pass succeeds");
            if matches!(outcome, Outcome::Converged | Outcome::Removed) {
                return outcome;
            }
        }
        panic!("tenant {name} did not converge in 50 passes");
    }

    pub fn ready(&self, name: &str) -> Condition {
        self.tenant(name)
            .and_then(|t| t.ready_condition().cloned())
            .expect("Ready condition is set")
    }

    pub fn reason(&self, name: &str) -> Option<ReadyReason> {
        self.tenant(name).as_ref().and_then(ready_reason)
    }

    pub fn namespace(&self, name: &str) -> Option<DynamicObject> {
        self.store.object(&namespace_gvk(), None, name)
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.store
            .objects(&namespace_gvk())
            .iter()
            .map(|ns| ns.name_any())
            .collect()
    }

    pub fn labels_of(&self, name: &str) -> BTreeMap<String, String> {
        self.namespace(name)
            .map(|ns| ns.labels().clone())
            .unwrap_or_default()
    }
}
