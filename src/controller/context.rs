use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use kube::api::DynamicObject;

use super::error::Result;
use crate::config::EngineConfig;
use crate::crd::TenantEnvironment;
use crate::health::HealthState;
use crate::store::ObjectStore;
use crate::templates::{
    AuthorityAccessor, Renderer, ScopeFilter, TemplateProcessor, TierTemplate,
    TierTemplateResolver, enabled_objects,
};

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Store holding tenants and everything provisioned for them
    pub store: Arc<dyn ObjectStore>,
    pub resolver: TierTemplateResolver,
    pub renderer: Arc<dyn Renderer>,
    pub config: EngineConfig,
    /// Health state for metrics (optional, for testing without metrics)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a context rendering with the default template processor
    pub fn new(
        store: Arc<dyn ObjectStore>,
        accessor: Arc<dyn AuthorityAccessor>,
        config: EngineConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let resolver = TierTemplateResolver::new(accessor, config.host_namespace.clone());
        Self {
            store,
            resolver,
            renderer: Arc::new(TemplateProcessor::new()),
            config,
            health_state,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Parameters every template of a tenant is rendered with
    pub fn template_params(&self, tenant: &TenantEnvironment) -> BTreeMap<String, String> {
        let name = tenant.name_any();
        BTreeMap::from([
            ("USERNAME".to_string(), name.clone()),
            ("SPACE_NAME".to_string(), name),
            (
                "OPERATOR_NAMESPACE".to_string(),
                self.config.operator_namespace.clone(),
            ),
        ])
    }

    /// Render a template for a tenant, dropping objects of features it has not enabled
    pub fn render_for(
        &self,
        tenant: &TenantEnvironment,
        template: &TierTemplate,
        filter: ScopeFilter,
    ) -> Result<Vec<DynamicObject>> {
        let objects = self
            .renderer
            .render(template, &self.template_params(tenant), filter)?;
        Ok(enabled_objects(objects, tenant.annotations()))
    }

    /// Render a template with the objects of every feature, enabled or not.
    ///
    /// Used to find what a tenant may still own from an earlier set of
    /// feature toggles.
    pub fn render_unfiltered(
        &self,
        tenant: &TenantEnvironment,
        template: &TierTemplate,
        filter: ScopeFilter,
    ) -> Result<Vec<DynamicObject>> {
        self.renderer
            .render(template, &self.template_params(tenant), filter)
    }

    /// Count an executed action in the metrics, when metrics are enabled
    pub fn record_action(&self, action: &str) {
        if let Some(health) = &self.health_state {
            health.metrics.record_action(action);
        }
    }
}
