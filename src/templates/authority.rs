//! Access to the remote cluster that publishes TierTemplates

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::TierTemplateResource;

/// A cluster (or other source) that serves TierTemplate objects
#[async_trait]
pub trait TemplateAuthority: Send + Sync {
    /// Whether the authority currently reports itself healthy
    async fn is_ready(&self) -> bool;

    /// Fetch a TierTemplate by name. Fails with a not-found error when it does not exist.
    async fn get_tier_template(&self, namespace: &str, name: &str) -> Result<TierTemplateResource>;
}

/// Hands out the current authority, `None` when none is known
pub trait AuthorityAccessor: Send + Sync {
    fn authority(&self) -> Option<Arc<dyn TemplateAuthority>>;
}

/// Template authority reached through a kube client for the host cluster
#[derive(Clone)]
pub struct KubeTemplateAuthority {
    client: Client,
}

impl KubeTemplateAuthority {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TemplateAuthority for KubeTemplateAuthority {
    async fn is_ready(&self) -> bool {
        match self.client.apiserver_version().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "host cluster health probe failed");
                false
            }
        }
    }

    async fn get_tier_template(&self, namespace: &str, name: &str) -> Result<TierTemplateResource> {
        let api: Api<TierTemplateResource> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tiertemplates '{name}' not found")))
    }
}

/// Template authority holding its templates in memory
#[derive(Default)]
pub struct StaticTemplateAuthority {
    templates: RwLock<BTreeMap<String, TierTemplateResource>>,
    not_ready: AtomicBool,
}

impl StaticTemplateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = TierTemplateResource>) -> Self {
        let authority = Self::new();
        for template in templates {
            authority.insert(template);
        }
        authority
    }

    /// Publish (or replace) a template under its object name
    pub fn insert(&self, template: TierTemplateResource) {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        templates.insert(template.name_any(), template);
    }

    pub fn remove(&self, name: &str) {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        templates.remove(name);
    }

    pub fn set_ready(&self, ready: bool) {
        self.not_ready.store(!ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl TemplateAuthority for StaticTemplateAuthority {
    async fn is_ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }

    async fn get_tier_template(&self, _namespace: &str, name: &str) -> Result<TierTemplateResource> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        templates
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tiertemplates '{name}' not found")))
    }
}

/// Accessor returning a fixed authority, or none at all
#[derive(Clone, Default)]
pub struct StaticAccessor {
    authority: Option<Arc<dyn TemplateAuthority>>,
}

impl StaticAccessor {
    pub fn new(authority: Arc<dyn TemplateAuthority>) -> Self {
        Self {
            authority: Some(authority),
        }
    }

    /// Accessor for a deployment where no host cluster is configured
    pub fn unavailable() -> Self {
        Self { authority: None }
    }
}

impl AuthorityAccessor for StaticAccessor {
    fn authority(&self) -> Option<Arc<dyn TemplateAuthority>> {
        self.authority.clone()
    }
}
