//! Cluster-scoped portion of a tenant's tier
//!
//! Cluster-scoped objects cannot be owned by the namespaced tenant, so they
//! are found through the owner and type labels and cleaned up explicitly.

use std::collections::BTreeMap;

use kube::ResourceExt;
use kube::api::{DynamicObject, GroupVersionKind};
use tracing::{info, instrument};

use super::applier::ResourceApplier;
use super::context::Context;
use super::error::Result;
use super::plan::{PlannedAction, plan_cluster_resources};
use super::status::StatusManager;
use crate::crd::TenantEnvironment;
use crate::resources::labels::{LABEL_TEMPLATE_REF, LABEL_TYPE, cluster_resource_labels, label};
use crate::resources::{CLUSTER_RESOURCES_TYPE, gvk_of, is_terminating, namespace_gvk, owner_selector};
use crate::templates::{ResolveSession, ScopeFilter, TierTemplate};

pub struct ClusterResourcesManager<'a> {
    ctx: &'a Context,
    session: &'a ResolveSession<'a>,
    status: StatusManager<'a>,
}

fn same_kind(a: &GroupVersionKind, b: &GroupVersionKind) -> bool {
    a.group == b.group && a.kind == b.kind
}

impl<'a> ClusterResourcesManager<'a> {
    pub fn new(ctx: &'a Context, session: &'a ResolveSession<'a>) -> Self {
        Self {
            ctx,
            session,
            status: StatusManager::new(ctx.store.as_ref()),
        }
    }

    /// Kinds of every object a template can produce, whatever the features.
    ///
    /// A template that is no longer published has no kinds.
    async fn kinds_of(
        &self,
        tenant: &TenantEnvironment,
        template_ref: &str,
    ) -> Result<Vec<GroupVersionKind>> {
        let template = match self.session.resolve(template_ref).await {
            Ok(template) => template,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        self.ctx
            .render_unfiltered(tenant, &template, ScopeFilter::All)?
            .iter()
            .map(gvk_of)
            .collect()
    }

    /// Cluster-scoped objects of the given kinds owned by the tenant
    async fn list_owned(
        &self,
        tenant: &str,
        kinds: &[GroupVersionKind],
    ) -> Result<Vec<DynamicObject>> {
        let mut selector = owner_selector(tenant);
        selector.insert(LABEL_TYPE.to_string(), CLUSTER_RESOURCES_TYPE.to_string());
        let mut owned = Vec::new();
        for gvk in kinds {
            owned.extend(self.ctx.store.list(gvk, &selector).await?);
        }
        Ok(owned)
    }

    /// Every cluster-scoped object the tenant owns.
    ///
    /// Lists the configured kinds and the kinds of `template_refs`, then
    /// follows the templateref labels of what was found until no new kind
    /// turns up. Objects left behind by an earlier template are found even
    /// when their kind is neither configured nor in the current template.
    async fn observe(
        &self,
        tenant: &TenantEnvironment,
        template_refs: Vec<String>,
    ) -> Result<Vec<DynamicObject>> {
        let name = tenant.name_any();
        let mut kinds = self.ctx.config.cluster_resource_kinds.clone();
        let mut listed: Vec<GroupVersionKind> = Vec::new();
        let mut resolved: Vec<String> = Vec::new();
        let mut pending = template_refs;
        let mut observed = Vec::new();

        loop {
            for template_ref in std::mem::take(&mut pending) {
                if template_ref.is_empty() || resolved.contains(&template_ref) {
                    continue;
                }
                for gvk in self.kinds_of(tenant, &template_ref).await? {
                    if !kinds.iter().any(|k| same_kind(k, &gvk)) {
                        kinds.push(gvk);
                    }
                }
                resolved.push(template_ref);
            }

            let unlisted: Vec<GroupVersionKind> = kinds
                .iter()
                .filter(|k| !listed.iter().any(|l| same_kind(l, k)))
                .cloned()
                .collect();
            if unlisted.is_empty() {
                return Ok(observed);
            }
            let found = self.list_owned(&name, &unlisted).await?;
            listed.extend(unlisted);
            for obj in &found {
                let template_ref = label(obj.labels(), LABEL_TEMPLATE_REF);
                if !resolved.iter().any(|r| r == template_ref) {
                    pending.push(template_ref.to_string());
                }
            }
            observed.extend(found);
        }
    }

    /// The desired template and the template of the last complete provisioning
    fn known_template_refs(tenant: &TenantEnvironment) -> Vec<String> {
        let current = tenant
            .spec
            .cluster_resources
            .as_ref()
            .map(|c| c.template_ref.clone());
        let recorded = tenant
            .status
            .as_ref()
            .and_then(|s| s.revisions.as_ref())
            .and_then(|r| r.cluster_resources.clone());
        current.into_iter().chain(recorded).collect()
    }

    async fn desired(
        &self,
        tenant: &TenantEnvironment,
    ) -> Result<Option<(TierTemplate, Vec<DynamicObject>)>> {
        let Some(cluster_resources) = &tenant.spec.cluster_resources else {
            return Ok(None);
        };
        let template = self.session.resolve(&cluster_resources.template_ref).await?;
        let rendered = self.ctx.render_for(tenant, &template, ScopeFilter::All)?;
        Ok(Some((template, rendered)))
    }

    /// Make one change towards the desired cluster-scoped objects.
    ///
    /// Returns `true` when something was created, updated or deleted.
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name_any()))]
    pub async fn ensure(&self, tenant: &mut TenantEnvironment) -> Result<bool> {
        let name = tenant.name_any();

        let desired = match self.desired(tenant).await {
            Ok(desired) => desired,
            Err(e) => {
                let context = format!(
                    "failed to retrieve cluster resources template for TenantEnvironment '{name}'"
                );
                return Err(self.status.cluster_resource_failure(tenant, e, context).await);
            }
        };
        let (template, rendered) = match desired {
            Some((template, rendered)) => (Some(template), rendered),
            None => (None, Vec::new()),
        };

        let observed = match self.observe(tenant, Self::known_template_refs(tenant)).await {
            Ok(observed) => observed,
            Err(e) => {
                let context = format!("failed to list cluster resources owned by '{name}'");
                return Err(self.status.cluster_resource_failure(tenant, e, context).await);
            }
        };

        let action = plan_cluster_resources(template.as_ref(), &rendered, &observed);
        self.execute(tenant, action, template.as_ref()).await
    }

    async fn execute(
        &self,
        tenant: &mut TenantEnvironment,
        action: PlannedAction,
        template: Option<&TierTemplate>,
    ) -> Result<bool> {
        let name = tenant.name_any();
        let applier = ResourceApplier::new(self.ctx.store.as_ref());
        let action_name = action.name();
        if let Some(target) = action.target() {
            info!(action = action_name, target = %target, "executing cluster resource action");
        }

        let result = match action {
            PlannedAction::NoAction => return Ok(false),
            PlannedAction::DeleteClusterResource { object } => {
                self.status.updating_unless_provisioning(tenant).await?;
                applier
                    .delete(&object)
                    .await
                    .map_err(|e| (e, format!("failed to delete cluster resource '{}'", object.name_any())))
            }
            PlannedAction::UpdateClusterResource { object } => {
                self.status.updating_unless_provisioning(tenant).await?;
                applier
                    .apply_one(&object, &self.labels(&name, template))
                    .await
                    .map_err(|e| (e, format!("failed to update cluster resource '{}'", object.name_any())))
            }
            PlannedAction::CreateClusterResource { object } => {
                let has_namespaces = match self.has_namespaces(&name).await {
                    Ok(has_namespaces) => has_namespaces,
                    Err(e) => {
                        let context = format!("failed to list namespaces with label owner '{name}'");
                        return Err(self.status.cluster_resource_failure(tenant, e, context).await);
                    }
                };
                if has_namespaces {
                    self.status.updating_unless_provisioning(tenant).await?;
                } else {
                    self.status.provisioning_unless_updating(tenant).await?;
                }
                applier
                    .apply_one(&object, &self.labels(&name, template))
                    .await
                    .map_err(|e| (e, format!("failed to create cluster resource '{}'", object.name_any())))
            }
            // Namespace actions are never planned for cluster resources
            _ => return Ok(false),
        };

        match result {
            Ok(_) => {
                self.ctx.record_action(action_name);
                Ok(true)
            }
            Err((e, context)) => Err(self.status.cluster_resource_failure(tenant, e, context).await),
        }
    }

    fn labels(&self, tenant: &str, template: Option<&TierTemplate>) -> BTreeMap<String, String> {
        match template {
            Some(t) => cluster_resource_labels(tenant, &t.tier_name, &t.template_ref, &t.revision),
            None => owner_selector(tenant),
        }
    }

    async fn has_namespaces(&self, tenant: &str) -> Result<bool> {
        let namespaces = self
            .ctx
            .store
            .list(&namespace_gvk(), &owner_selector(tenant))
            .await?;
        Ok(!namespaces.is_empty())
    }

    /// Delete one cluster-scoped object of the tenant.
    ///
    /// Walks the templates recorded on the existing objects (not only the
    /// current spec, which may no longer name them) and deletes the first
    /// rendered object still present. Returns `false` once nothing is left to
    /// delete.
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name_any()))]
    pub async fn delete(&self, tenant: &TenantEnvironment) -> Result<bool> {
        let applier = ResourceApplier::new(self.ctx.store.as_ref());
        let mut refs = Self::known_template_refs(tenant);
        let observed = self.observe(tenant, refs.clone()).await?;
        for obj in &observed {
            let template_ref = label(obj.labels(), LABEL_TEMPLATE_REF);
            if !template_ref.is_empty() && !refs.iter().any(|r| r == template_ref) {
                refs.push(template_ref.to_string());
            }
        }

        for template_ref in &refs {
            let template = match self.session.resolve(template_ref).await {
                Ok(template) => template,
                // Unpublished template: its objects are still removed below
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let rendered = self
                .ctx
                .render_unfiltered(tenant, &template, ScopeFilter::All)?;
            for obj in &rendered {
                let gvk = gvk_of(obj)?;
                let live = self.ctx.store.get(&gvk, None, &obj.name_any()).await?;
                if let Some(live) = live
                    && !is_terminating(&live)
                    && applier.delete(&live).await?
                {
                    self.ctx.record_action("delete_cluster_resource");
                    return Ok(true);
                }
            }
        }

        // Objects no template accounts for any more
        for obj in observed.iter().filter(|o| !is_terminating(o)) {
            if applier.delete(obj).await? {
                self.ctx.record_action("delete_cluster_resource");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
