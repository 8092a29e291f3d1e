//! Resolve templateRefs into TierTemplates
//!
//! The authority is the source of truth and may be edited between passes,
//! so resolved templates are cached for a single pass only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::ResourceExt;
use tracing::debug;

use super::authority::AuthorityAccessor;
use crate::controller::error::{Error, Result};
use crate::crd::{TemplateBody, TierTemplateResource};

/// A resolved template for one namespace type or the cluster-scoped bundle
#[derive(Clone, Debug, PartialEq)]
pub struct TierTemplate {
    /// Name of the TierTemplate object this was resolved from
    pub template_ref: String,
    pub tier_name: String,
    pub type_name: String,
    pub revision: String,
    pub body: TemplateBody,
}

impl From<TierTemplateResource> for TierTemplate {
    fn from(resource: TierTemplateResource) -> Self {
        Self {
            template_ref: resource.name_any(),
            tier_name: resource.spec.tier_name,
            type_name: resource.spec.type_,
            revision: resource.spec.revision,
            body: resource.spec.template,
        }
    }
}

#[derive(Clone)]
pub struct TierTemplateResolver {
    accessor: Arc<dyn AuthorityAccessor>,
    namespace: String,
}

impl TierTemplateResolver {
    /// `namespace` is where the authority keeps its TierTemplates
    pub fn new(accessor: Arc<dyn AuthorityAccessor>, namespace: impl Into<String>) -> Self {
        Self {
            accessor,
            namespace: namespace.into(),
        }
    }

    /// Start a reconciliation pass with an empty cache
    pub fn session(&self) -> ResolveSession<'_> {
        ResolveSession {
            resolver: self,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self, template_ref: &str) -> Result<TierTemplate> {
        if template_ref.is_empty() {
            return Err(Error::NotFound("templateRef is not provided".to_string()));
        }
        let authority = self
            .accessor
            .authority()
            .ok_or_else(|| Error::Unreachable("unknown cluster".to_string()))?;
        if !authority.is_ready().await {
            return Err(Error::NotReady);
        }
        let resource = authority
            .get_tier_template(&self.namespace, template_ref)
            .await
            .map_err(|e| {
                e.context(format!(
                    "unable to retrieve the TierTemplate '{template_ref}' from 'Host' cluster"
                ))
            })?;
        Ok(resource.into())
    }
}

/// Per-pass view on the resolver
pub struct ResolveSession<'a> {
    resolver: &'a TierTemplateResolver,
    cache: Mutex<HashMap<String, TierTemplate>>,
}

impl ResolveSession<'_> {
    pub async fn resolve(&self, template_ref: &str) -> Result<TierTemplate> {
        if let Some(hit) = self.cached(template_ref) {
            return Ok(hit);
        }
        let template = self.resolver.fetch(template_ref).await?;
        debug!(template_ref, revision = %template.revision, "resolved tier template");
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(template_ref.to_string(), template.clone());
        Ok(template)
    }

    fn cached(&self, template_ref: &str) -> Option<TierTemplate> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(template_ref)
            .cloned()
    }
}
