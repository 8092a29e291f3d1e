//! Decide the single next change for a tenant
//!
//! Everything here is pure: desired templates and observed objects go in, one
//! [`PlannedAction`] comes out. The managers execute the action against the
//! store. Deletions are always planned before creations and updates so stale
//! objects never live next to their replacements.

use kube::api::DynamicObject;
use kube::ResourceExt;

use crate::resources::labels::{LABEL_REVISION, LABEL_TEMPLATE_REF, LABEL_TIER, LABEL_TYPE, label};
use crate::resources::{is_terminating, object_ref, same_object};
use crate::templates::{APPLIED_FEATURES_ANNOTATION, TierTemplate};

/// A namespace type from the tenant spec with its resolved template
#[derive(Clone, Debug)]
pub struct DesiredNamespace {
    pub type_name: String,
    pub template: TierTemplate,
    /// Enabled features of the tenant, as recorded on an up-to-date namespace
    pub features: String,
}

/// The one change to make in this pass
#[derive(Clone, Debug)]
pub enum PlannedAction {
    /// Create the namespace object of a type that does not exist yet
    CreateNamespace {
        type_name: String,
        template: TierTemplate,
    },
    /// Bring the objects inside an existing namespace to the desired revision
    UpdateNamespaceInnerResources {
        type_name: String,
        template: TierTemplate,
        namespace: DynamicObject,
    },
    DeleteNamespace {
        namespace: DynamicObject,
    },
    CreateClusterResource {
        object: DynamicObject,
    },
    UpdateClusterResource {
        object: DynamicObject,
    },
    DeleteClusterResource {
        object: DynamicObject,
    },
    NoAction,
}

impl PlannedAction {
    /// Short name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            PlannedAction::CreateNamespace { .. } => "create_namespace",
            PlannedAction::UpdateNamespaceInnerResources { .. } => "update_namespace",
            PlannedAction::DeleteNamespace { .. } => "delete_namespace",
            PlannedAction::CreateClusterResource { .. } => "create_cluster_resource",
            PlannedAction::UpdateClusterResource { .. } => "update_cluster_resource",
            PlannedAction::DeleteClusterResource { .. } => "delete_cluster_resource",
            PlannedAction::NoAction => "none",
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            PlannedAction::DeleteNamespace { .. } | PlannedAction::DeleteClusterResource { .. }
        )
    }

    /// Name of the object the action touches, if any
    pub fn target(&self) -> Option<String> {
        match self {
            PlannedAction::CreateNamespace { template, .. } => Some(template.template_ref.clone()),
            PlannedAction::UpdateNamespaceInnerResources { namespace, .. }
            | PlannedAction::DeleteNamespace { namespace } => Some(namespace.name_any()),
            PlannedAction::CreateClusterResource { object }
            | PlannedAction::UpdateClusterResource { object }
            | PlannedAction::DeleteClusterResource { object } => Some(object_ref(object).to_string()),
            PlannedAction::NoAction => None,
        }
    }
}

fn is_active(namespace: &DynamicObject) -> bool {
    namespace.data.pointer("/status/phase").and_then(|p| p.as_str()) == Some("Active")
}

/// Whether a namespace already carries the desired revision, tier and features
fn namespace_is_current(namespace: &DynamicObject, desired: &DesiredNamespace) -> bool {
    let labels = namespace.labels();
    let revision = label(labels, LABEL_REVISION);
    let applied_features = namespace
        .annotations()
        .get(APPLIED_FEATURES_ANNOTATION)
        .map_or("", String::as_str);
    !revision.is_empty()
        && revision == desired.template.revision
        && label(labels, LABEL_TIER) == desired.template.tier_name
        && applied_features == desired.features
}

/// First desired namespace that is missing or out of date, scanned in spec order.
///
/// A namespace that exists but is not `Active` yet is skipped for this pass.
/// The observed namespace is `None` when the namespace has to be created.
pub fn next_namespace_to_provision_or_update<'a>(
    desired: &'a [DesiredNamespace],
    observed: &'a [DynamicObject],
) -> Option<(&'a DesiredNamespace, Option<&'a DynamicObject>)> {
    for candidate in desired {
        let found = observed
            .iter()
            .find(|ns| label(ns.labels(), LABEL_TYPE) == candidate.type_name);
        match found {
            None => return Some((candidate, None)),
            Some(ns) if !is_active(ns) => continue,
            Some(ns) if !namespace_is_current(ns, candidate) => {
                return Some((candidate, Some(ns)));
            }
            Some(_) => continue,
        }
    }
    None
}

/// First observed namespace whose type is no longer desired.
///
/// Namespaces already being deleted are not candidates again.
pub fn next_namespace_to_deprovision<'a>(
    desired: &[DesiredNamespace],
    observed: &'a [DynamicObject],
) -> Option<&'a DynamicObject> {
    observed.iter().find(|ns| {
        let type_name = label(ns.labels(), LABEL_TYPE);
        !is_terminating(ns) && !desired.iter().any(|d| d.type_name == type_name)
    })
}

pub fn plan_namespaces(desired: &[DesiredNamespace], observed: &[DynamicObject]) -> PlannedAction {
    if let Some(namespace) = next_namespace_to_deprovision(desired, observed) {
        return PlannedAction::DeleteNamespace {
            namespace: namespace.clone(),
        };
    }
    match next_namespace_to_provision_or_update(desired, observed) {
        Some((d, None)) => PlannedAction::CreateNamespace {
            type_name: d.type_name.clone(),
            template: d.template.clone(),
        },
        Some((d, Some(ns))) => PlannedAction::UpdateNamespaceInnerResources {
            type_name: d.type_name.clone(),
            template: d.template.clone(),
            namespace: ns.clone(),
        },
        None => PlannedAction::NoAction,
    }
}

/// Whether a cluster-scoped object was produced by the desired template
fn cluster_object_is_current(object: &DynamicObject, desired: Option<&TierTemplate>) -> bool {
    let Some(template) = desired else {
        return false;
    };
    let labels = object.labels();
    label(labels, LABEL_TEMPLATE_REF) == template.template_ref
        && label(labels, LABEL_TIER) == template.tier_name
}

/// Plan the next change to the cluster-scoped objects of a tenant.
///
/// `rendered` is the render of `desired` (empty when there is no desired
/// template). Owned objects the render does not contain are deleted first,
/// whatever template they came from. Then objects produced by another
/// template are updated, then missing objects are created.
pub fn plan_cluster_resources(
    desired: Option<&TierTemplate>,
    rendered: &[DynamicObject],
    observed: &[DynamicObject],
) -> PlannedAction {
    let live: Vec<&DynamicObject> = observed.iter().filter(|o| !is_terminating(o)).collect();

    if let Some(stale) = live
        .iter()
        .find(|o| !rendered.iter().any(|r| same_object(r, o)))
    {
        return PlannedAction::DeleteClusterResource {
            object: (*stale).clone(),
        };
    }

    if let Some(replacement) = rendered.iter().find(|r| {
        live.iter()
            .any(|o| same_object(r, o) && !cluster_object_is_current(o, desired))
    }) {
        return PlannedAction::UpdateClusterResource {
            object: replacement.clone(),
        };
    }

    if let Some(missing) = rendered
        .iter()
        .find(|r| !observed.iter().any(|o| same_object(r, o)))
    {
        return PlannedAction::CreateClusterResource {
            object: missing.clone(),
        };
    }

    PlannedAction::NoAction
}

/// First object of the current render that the new render no longer contains
pub fn first_redundant<'a>(
    current: &'a [DynamicObject],
    new: &[DynamicObject],
) -> Option<&'a DynamicObject> {
    current
        .iter()
        .find(|c| !new.iter().any(|n| same_object(c, n)))
}
