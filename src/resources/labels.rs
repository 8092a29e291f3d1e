//! Label keys that record ownership and provisioned revisions on child objects
//!
//! Tenants never hold owner references to their namespaces or cluster-scoped
//! objects. These labels are the only durable link between a tenant and what
//! was provisioned for it, and the differ reads them back on every pass.

use std::collections::BTreeMap;

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "tenant-operator";

/// Value of the provider label on everything this operator creates
pub const PROVIDER: &str = "tenant-operator";

pub const LABEL_OWNER: &str = "tenancy.example.com/owner";
pub const LABEL_TYPE: &str = "tenancy.example.com/type";
pub const LABEL_TIER: &str = "tenancy.example.com/tier";
pub const LABEL_TEMPLATE_REF: &str = "tenancy.example.com/templateref";
pub const LABEL_REVISION: &str = "tenancy.example.com/revision";
pub const LABEL_PROVIDER: &str = "tenancy.example.com/provider";

/// Type label value carried by cluster-scoped objects
pub const CLUSTER_RESOURCES_TYPE: &str = "clusterresources";

/// Selector matching every object owned by a tenant
pub fn owner_selector(tenant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_OWNER.to_string(), tenant.to_string())])
}

/// Labels set on a namespace when it is first created.
///
/// Tier and revision are added only after the inner objects were applied,
/// so a namespace without them is known to be incomplete.
pub fn namespace_creation_labels(tenant: &str, type_: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_OWNER.to_string(), tenant.to_string()),
        (LABEL_TYPE.to_string(), type_.to_string()),
        (LABEL_PROVIDER.to_string(), PROVIDER.to_string()),
    ])
}

/// Labels recording which template revision a namespace's inner objects came from
pub fn namespace_revision_labels(
    tier: &str,
    template_ref: &str,
    revision: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TIER.to_string(), tier.to_string()),
        (LABEL_TEMPLATE_REF.to_string(), template_ref.to_string()),
        (LABEL_REVISION.to_string(), revision.to_string()),
    ])
}

/// Labels set on objects created inside a tenant namespace
pub fn inner_object_labels(tenant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_OWNER.to_string(), tenant.to_string()),
        (LABEL_PROVIDER.to_string(), PROVIDER.to_string()),
    ])
}

/// Labels set on every cluster-scoped object of a tenant
pub fn cluster_resource_labels(
    tenant: &str,
    tier: &str,
    template_ref: &str,
    revision: &str,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (LABEL_OWNER.to_string(), tenant.to_string()),
        (LABEL_TYPE.to_string(), CLUSTER_RESOURCES_TYPE.to_string()),
        (LABEL_PROVIDER.to_string(), PROVIDER.to_string()),
    ]);
    labels.extend(namespace_revision_labels(tier, template_ref, revision));
    labels
}

/// Read a label, treating a missing label as empty
pub fn label<'a>(labels: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    labels.get(key).map(String::as_str).unwrap_or_default()
}
