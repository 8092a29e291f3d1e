pub mod labels;
pub mod objects;

pub use labels::{
    CLUSTER_RESOURCES_TYPE, FIELD_MANAGER, LABEL_OWNER, LABEL_PROVIDER, LABEL_REVISION,
    LABEL_TEMPLATE_REF, LABEL_TIER, LABEL_TYPE, PROVIDER, owner_selector,
};
pub use objects::{ObjectRef, gvk_of, is_terminating, namespace_gvk, object_ref, same_object};
