//! Tier template resolution and rendering

pub mod authority;
pub mod features;
pub mod renderer;
pub mod resolver;

pub use authority::{
    AuthorityAccessor, KubeTemplateAuthority, StaticAccessor, StaticTemplateAuthority,
    TemplateAuthority,
};
pub use features::{
    APPLIED_FEATURES_ANNOTATION, FEATURE_ANNOTATION, FEATURE_TOGGLES_ANNOTATION, enabled_features,
    enabled_features_key, enabled_objects,
};
pub use renderer::{Renderer, ScopeFilter, TemplateProcessor, kind_priority};
pub use resolver::{ResolveSession, TierTemplate, TierTemplateResolver};
