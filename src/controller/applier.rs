//! Create-or-update of rendered objects

use std::collections::BTreeMap;

use kube::ResourceExt;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

use super::error::Result;
use super::plan::first_redundant;
use crate::resources::{gvk_of, object_ref};
use crate::store::ObjectStore;

/// Applies rendered objects to the store and reports whether anything changed
pub struct ResourceApplier<'a> {
    store: &'a dyn ObjectStore,
}

/// Whether `live` already holds everything `desired` asks for.
///
/// Maps match when every desired key is present with a matching value, so
/// fields the server adds on its own do not count as drift.
pub fn json_contains(live: &Value, desired: &Value) -> bool {
    match (live, desired) {
        (_, Value::Null) => true,
        (Value::Object(live), Value::Object(desired)) => desired
            .iter()
            .all(|(k, v)| live.get(k).is_some_and(|l| json_contains(l, v))),
        (Value::Array(live), Value::Array(desired)) => {
            live.len() == desired.len()
                && live.iter().zip(desired).all(|(l, d)| json_contains(l, d))
        }
        (live, desired) => live == desired,
    }
}

fn map_contains(live: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    desired.iter().all(|(k, v)| live.get(k) == Some(v))
}

/// Whether the live object already matches the desired one
pub fn object_contains(live: &DynamicObject, desired: &DynamicObject) -> bool {
    let mut desired_data = desired.data.clone();
    if let Some(data) = desired_data.as_object_mut() {
        data.remove("status");
    }
    map_contains(live.labels(), desired.labels())
        && map_contains(live.annotations(), desired.annotations())
        && json_contains(&live.data, &desired_data)
}

impl<'a> ResourceApplier<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Apply all objects in order, stopping at the first failure
    pub async fn apply(
        &self,
        objects: &[DynamicObject],
        extra_labels: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let mut changed = false;
        for obj in objects {
            changed |= self.apply_one(obj, extra_labels).await?;
        }
        Ok(changed)
    }

    /// Create the object, or update it when the live copy differs
    pub async fn apply_one(
        &self,
        obj: &DynamicObject,
        extra_labels: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let mut desired = obj.clone();
        desired.labels_mut().extend(extra_labels.clone());
        let gvk = gvk_of(&desired)?;
        let target = object_ref(&desired);

        let live = self
            .store
            .get(&gvk, desired.metadata.namespace.as_deref(), &desired.name_any())
            .await?;
        match live {
            None => match self.store.create(&desired).await {
                Ok(()) => {
                    info!(object = %target, "created object");
                    Ok(true)
                }
                // Someone else created it between our get and create
                Err(e) if e.is_already_exists() => {
                    debug!(object = %target, "object already exists");
                    Ok(true)
                }
                Err(e) => Err(e.context(format!("unable to create {target}"))),
            },
            Some(live) if object_contains(&live, &desired) => {
                debug!(object = %target, "object is up to date");
                Ok(false)
            }
            Some(_) => {
                self.store
                    .update(&desired)
                    .await
                    .map_err(|e| e.context(format!("unable to update {target}")))?;
                info!(object = %target, "updated object");
                Ok(true)
            }
        }
    }

    /// Delete an object, returning `false` when it was already gone
    pub async fn delete(&self, obj: &DynamicObject) -> Result<bool> {
        let gvk = gvk_of(obj)?;
        let target = object_ref(obj);
        match self
            .store
            .delete(&gvk, obj.metadata.namespace.as_deref(), &obj.name_any())
            .await
        {
            Ok(()) => {
                info!(object = %target, "deleted object");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.context(format!("unable to delete {target}"))),
        }
    }

    /// Delete the first object of `current` that `new` no longer contains.
    ///
    /// At most one object is deleted per call. Objects that are already gone
    /// are skipped.
    pub async fn delete_redundant_objects(
        &self,
        current: &[DynamicObject],
        new: &[DynamicObject],
    ) -> Result<bool> {
        let mut remaining = current;
        while let Some(redundant) = first_redundant(remaining, new) {
            if self.delete(redundant).await? {
                return Ok(true);
            }
            let pos = remaining
                .iter()
                .position(|o| std::ptr::eq(o, redundant))
                .map_or(remaining.len(), |p| p + 1);
            remaining = &remaining[pos..];
        }
        Ok(false)
    }
}
