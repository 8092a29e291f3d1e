use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::ResourceExt;
use kube::api::{DynamicObject, GroupVersionKind};
use serde_json::json;

use super::ObjectStore;
use crate::controller::error::{Error, Result};
use crate::crd::TenantEnvironment;
use crate::resources::gvk_of;

/// Operations that can be made to fail on an [`InMemoryStore`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    Delete,
    UpdateTenantStatus,
    UpdateTenantFinalizers,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    group: String,
    kind: String,
    namespace: String,
    name: String,
}

impl Key {
    fn new(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: gvk.group.clone(),
            kind: gvk.kind.clone(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    fn matches_kind(&self, gvk: &GroupVersionKind) -> bool {
        self.group == gvk.group && self.kind == gvk.kind
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    tenants: BTreeMap<(String, String), TenantEnvironment>,
    failures: Vec<(StoreOp, Option<String>)>,
    object_writes: usize,
    tenant_writes: usize,
    resource_version: u64,
}

impl State {
    fn check(&self, op: StoreOp, kind: &str) -> Result<()> {
        let injected = self
            .failures
            .iter()
            .any(|(o, k)| *o == op && k.as_deref().is_none_or(|k| k == kind));
        if injected {
            return Err(Error::StoreError(format!(
                "injected {op:?} failure for {kind}"
            )));
        }
        Ok(())
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// Object store kept entirely in memory.
///
/// Behaves like a minimal API server: creates assign a resource version,
/// namespaces come up `Active`, deleting a namespace removes its content and
/// a tenant disappears once it is being deleted and has no finalizers left.
/// Failures can be injected per operation and kind.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the maps consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as-is, without counting a write
    pub fn insert(&self, obj: DynamicObject) -> Result<()> {
        let gvk = gvk_of(&obj)?;
        let key = Key::new(&gvk, obj.metadata.namespace.as_deref(), &obj.name_any());
        self.lock().objects.insert(key, obj);
        Ok(())
    }

    /// Seed a tenant as-is, without counting a write
    pub fn insert_tenant(&self, tenant: TenantEnvironment) {
        let key = (tenant.namespace().unwrap_or_default(), tenant.name_any());
        self.lock().tenants.insert(key, tenant);
    }

    pub fn tenant(&self, namespace: &str, name: &str) -> Option<TenantEnvironment> {
        self.lock()
            .tenants
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn object(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<DynamicObject> {
        self.lock()
            .objects
            .get(&Key::new(gvk, namespace, name))
            .cloned()
    }

    /// All stored objects of a kind, ordered by namespace and name
    pub fn objects(&self, gvk: &GroupVersionKind) -> Vec<DynamicObject> {
        self.lock()
            .objects
            .iter()
            .filter(|(k, _)| k.matches_kind(gvk))
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Make every `op` on `kind` (or on any kind when `None`) fail
    pub fn fail_on(&self, op: StoreOp, kind: Option<&str>) {
        self.lock().failures.push((op, kind.map(str::to_string)));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of create, update and delete calls that changed an object
    pub fn object_writes(&self) -> usize {
        self.lock().object_writes
    }

    /// Number of status and finalizer writes on tenants
    pub fn tenant_writes(&self) -> usize {
        self.lock().tenant_writes
    }

    /// Mark an object as being deleted without removing it
    pub fn mark_terminating(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) {
        let mut state = self.lock();
        if let Some(obj) = state.objects.get_mut(&Key::new(gvk, namespace, name)) {
            obj.metadata.deletion_timestamp = Some(
                k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            );
            if gvk.kind == "Namespace" {
                obj.data["status"] = json!({ "phase": "Terminating" });
            }
        }
    }
}

fn labels_match(obj: &DynamicObject, selector: &BTreeMap<String, String>) -> bool {
    let labels = obj.labels();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let state = self.lock();
        state.check(StoreOp::Get, &gvk.kind)?;
        Ok(state.objects.get(&Key::new(gvk, namespace, name)).cloned())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let state = self.lock();
        state.check(StoreOp::List, &gvk.kind)?;
        Ok(state
            .objects
            .iter()
            .filter(|(k, o)| k.matches_kind(gvk) && labels_match(o, labels))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(obj)?;
        let mut state = self.lock();
        state.check(StoreOp::Create, &gvk.kind)?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let key = Key::new(&gvk, obj.metadata.namespace.as_deref(), name);
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("{} '{}'", gvk.kind, name)));
        }

        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(state.next_version());
        stored.metadata.creation_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        if gvk.kind == "Namespace" && gvk.group.is_empty() {
            stored.data["status"] = json!({ "phase": "Active" });
        }
        state.objects.insert(key, stored);
        state.object_writes += 1;
        Ok(())
    }

    async fn update(&self, obj: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(obj)?;
        let mut state = self.lock();
        state.check(StoreOp::Update, &gvk.kind)?;
        let key = Key::new(&gvk, obj.metadata.namespace.as_deref(), &obj.name_any());
        let version = state.next_version();
        let live = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("{} '{}' not found", gvk.kind, key.name)))?;

        let status = live.data.get("status").cloned();
        live.metadata.labels = obj.metadata.labels.clone();
        live.metadata.annotations = obj.metadata.annotations.clone();
        live.metadata.resource_version = Some(version);
        live.data = obj.data.clone();
        if live.data.is_null() {
            live.data = json!({});
        }
        if let (Some(status), Some(data)) = (status, live.data.as_object_mut()) {
            data.insert("status".to_string(), status);
        }
        state.object_writes += 1;
        Ok(())
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::Delete, &gvk.kind)?;
        let key = Key::new(gvk, namespace, name);
        if state.objects.remove(&key).is_none() {
            return Err(Error::NotFound(format!("{} '{}' not found", gvk.kind, name)));
        }
        if gvk.kind == "Namespace" && gvk.group.is_empty() {
            state.objects.retain(|k, _| k.namespace != name);
        }
        state.object_writes += 1;
        Ok(())
    }

    async fn get_tenant(&self, namespace: &str, name: &str) -> Result<Option<TenantEnvironment>> {
        let state = self.lock();
        state.check(StoreOp::Get, "TenantEnvironment")?;
        Ok(state
            .tenants
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn update_tenant_status(&self, tenant: &TenantEnvironment) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::UpdateTenantStatus, "TenantEnvironment")?;
        let key = (tenant.namespace().unwrap_or_default(), tenant.name_any());
        let stored = state
            .tenants
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("TenantEnvironment '{}' not found", key.1)))?;
        stored.status = tenant.status.clone();
        state.tenant_writes += 1;
        Ok(())
    }

    async fn update_tenant_finalizers(&self, tenant: &TenantEnvironment) -> Result<()> {
        let mut state = self.lock();
        state.check(StoreOp::UpdateTenantFinalizers, "TenantEnvironment")?;
        let key = (tenant.namespace().unwrap_or_default(), tenant.name_any());
        let stored = state
            .tenants
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("TenantEnvironment '{}' not found", key.1)))?;
        stored.metadata.finalizers = tenant.metadata.finalizers.clone();
        let released = stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty();
        if released {
            state.tenants.remove(&key);
        }
        state.tenant_writes += 1;
        Ok(())
    }
}
