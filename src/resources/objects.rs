//! Identity helpers for dynamically typed objects

use kube::ResourceExt;
use kube::api::{DynamicObject, GroupVersionKind};

use crate::controller::error::{Error, Result};

/// Kind and name of an object, which is how renders are compared
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} '{}/{}'", self.kind, ns, self.name),
            None => write!(f, "{} '{}'", self.kind, self.name),
        }
    }
}

pub fn namespace_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Namespace")
}

/// Parse the group/version/kind of an object from its type metadata
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj
        .types
        .as_ref()
        .ok_or(Error::MissingObjectKey(".apiVersion"))?;
    if types.kind.is_empty() {
        return Err(Error::MissingObjectKey(".kind"));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

pub fn object_ref(obj: &DynamicObject) -> ObjectRef {
    ObjectRef {
        kind: obj
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_default(),
        namespace: obj.namespace(),
        name: obj.name_any(),
    }
}

/// Two objects are the same when kind and name match
pub fn same_object(a: &DynamicObject, b: &DynamicObject) -> bool {
    let (a, b) = (object_ref(a), object_ref(b));
    a.kind == b.kind && a.name == b.name
}

pub fn is_terminating(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
        || obj.data.pointer("/status/phase").and_then(|p| p.as_str()) == Some("Terminating")
}
