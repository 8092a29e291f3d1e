use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use super::{ObjectStore, selector_string};
use crate::controller::error::{Error, Result};
use crate::crd::TenantEnvironment;
use crate::resources::{FIELD_MANAGER, gvk_of};

/// Object store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource::from_gvk(gvk);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn tenants(&self, namespace: &str) -> Api<TenantEnvironment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Strip server-populated fields so the object can be sent as an apply patch
fn apply_body(obj: &DynamicObject) -> DynamicObject {
    let mut body = obj.clone();
    body.metadata.managed_fields = None;
    body.metadata.resource_version = None;
    body.metadata.uid = None;
    body.metadata.creation_timestamp = None;
    body.metadata.generation = None;
    if let Some(data) = body.data.as_object_mut() {
        data.remove("status");
    }
    body
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(gvk, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(&selector_string(labels));
        match self.api(gvk, None).list(&params).await {
            Ok(list) => Ok(list.items),
            // A kind that is not installed on this cluster has no objects
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(kind = %gvk.kind, "kind not served, treating list as empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, obj: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(obj)?;
        let api = self.api(&gvk, obj.metadata.namespace.as_deref());
        api.create(&PostParams::default(), obj).await?;
        Ok(())
    }

    async fn update(&self, obj: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(obj)?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let api = self.api(&gvk, obj.metadata.namespace.as_deref());
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&apply_body(obj)),
        )
        .await?;
        Ok(())
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        self.api(gvk, namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn get_tenant(&self, namespace: &str, name: &str) -> Result<Option<TenantEnvironment>> {
        Ok(self.tenants(namespace).get_opt(name).await?)
    }

    async fn update_tenant_status(&self, tenant: &TenantEnvironment) -> Result<()> {
        let namespace = tenant
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let patch = json!({ "status": tenant.status });
        self.tenants(&namespace)
            .patch_status(
                &tenant.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn update_tenant_finalizers(&self, tenant: &TenantEnvironment) -> Result<()> {
        let namespace = tenant
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let finalizers = tenant.finalizers();
        let patch = if finalizers.is_empty() {
            json!({ "metadata": { "finalizers": null } })
        } else {
            json!({ "metadata": { "finalizers": finalizers } })
        };
        match self
            .tenants(&namespace)
            .patch(&tenant.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // Already gone after the last finalizer was removed
            Err(kube::Error::Api(e)) if e.code == 404 && finalizers.is_empty() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
