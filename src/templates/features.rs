//! Feature toggles
//!
//! Objects can be tied to an optional feature with an annotation. They are
//! only provisioned for tenants that list the feature in their toggles.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;
use kube::api::DynamicObject;

/// Annotation on a template object naming the feature it belongs to
pub const FEATURE_ANNOTATION: &str = "tenancy.example.com/feature";

/// Comma-separated list of features enabled for a tenant
pub const FEATURE_TOGGLES_ANNOTATION: &str = "tenancy.example.com/feature-toggles";

/// Features whose objects were applied to a namespace, in the form of
/// [`enabled_features_key`]
pub const APPLIED_FEATURES_ANNOTATION: &str = "tenancy.example.com/applied-features";

/// Enabled features of a tenant, sorted and without duplicates
pub fn enabled_features(tenant_annotations: &BTreeMap<String, String>) -> BTreeSet<&str> {
    tenant_annotations
        .get(FEATURE_TOGGLES_ANNOTATION)
        .map(|toggles| {
            toggles
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Canonical comma-separated form of the enabled features, empty when none
pub fn enabled_features_key(tenant_annotations: &BTreeMap<String, String>) -> String {
    enabled_features(tenant_annotations)
        .into_iter()
        .collect::<Vec<_>>()
        .join(",")
}

/// Keep the objects that are not tied to a feature or whose feature is enabled
pub fn enabled_objects(
    objects: Vec<DynamicObject>,
    tenant_annotations: &BTreeMap<String, String>,
) -> Vec<DynamicObject> {
    let enabled = enabled_features(tenant_annotations);
    objects
        .into_iter()
        .filter(|obj| match obj.annotations().get(FEATURE_ANNOTATION) {
            Some(feature) => enabled.contains(feature.as_str()),
            None => true,
        })
        .collect()
}
