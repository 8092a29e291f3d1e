//! Object store client used by the engine
//!
//! The engine only ever needs single-object CRUD plus label-selector lists.
//! Every call is individually atomic and nothing is transactional across
//! objects, which is why the managers change at most one object per pass.

mod kube_store;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};

use crate::controller::error::Result;
use crate::crd::TenantEnvironment;

pub use kube_store::KubeObjectStore;
pub use memory::{InMemoryStore, StoreOp};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects of a kind (across all namespaces) carrying all the given labels
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object. Fails with an "already exists" error on a name clash.
    async fn create(&self, obj: &DynamicObject) -> Result<()>;

    /// Replace the labels, annotations and content of an existing object
    async fn update(&self, obj: &DynamicObject) -> Result<()>;

    /// Delete an object. Fails with a "not found" error when it is already gone.
    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str)
    -> Result<()>;

    async fn get_tenant(&self, namespace: &str, name: &str) -> Result<Option<TenantEnvironment>>;

    /// Persist `tenant.status`
    async fn update_tenant_status(&self, tenant: &TenantEnvironment) -> Result<()>;

    /// Persist `tenant.metadata.finalizers`
    async fn update_tenant_finalizers(&self, tenant: &TenantEnvironment) -> Result<()>;
}

/// Render a label map as a Kubernetes label selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
