//! Namespace-scoped portion of a tenant's tier, one namespace per pass

use kube::ResourceExt;
use kube::api::DynamicObject;
use tracing::{debug, info, instrument};

use super::applier::ResourceApplier;
use super::context::Context;
use super::error::{Error, Result, ResultExt};
use super::plan::{DesiredNamespace, PlannedAction, plan_namespaces};
use super::state_machine::ReadyReason;
use super::status::StatusManager;
use crate::crd::TenantEnvironment;
use crate::resources::labels::{
    LABEL_TEMPLATE_REF, inner_object_labels, label, namespace_creation_labels,
    namespace_revision_labels,
};
use crate::resources::{is_terminating, namespace_gvk, owner_selector};
use crate::templates::{
    APPLIED_FEATURES_ANNOTATION, ResolveSession, ScopeFilter, TierTemplate, enabled_features_key,
};

pub struct NamespacesManager<'a> {
    ctx: &'a Context,
    session: &'a ResolveSession<'a>,
    status: StatusManager<'a>,
}

impl<'a> NamespacesManager<'a> {
    pub fn new(ctx: &'a Context, session: &'a ResolveSession<'a>) -> Self {
        Self {
            ctx,
            session,
            status: StatusManager::new(ctx.store.as_ref()),
        }
    }

    fn applier(&self) -> ResourceApplier<'a> {
        ResourceApplier::new(self.ctx.store.as_ref())
    }

    /// Namespaces carrying the tenant's owner label
    async fn list_owned(&self, tenant: &str) -> Result<Vec<DynamicObject>> {
        self.ctx
            .store
            .list(&namespace_gvk(), &owner_selector(tenant))
            .await
    }

    /// Resolve the template of every requested namespace, in declaration order
    async fn desired(
        &self,
        tenant: &TenantEnvironment,
    ) -> std::result::Result<Vec<DesiredNamespace>, (String, Error)> {
        let features = enabled_features_key(tenant.annotations());
        let mut desired = Vec::with_capacity(tenant.spec.namespaces.len());
        for ns in &tenant.spec.namespaces {
            let template = self
                .session
                .resolve(&ns.template_ref)
                .await
                .map_err(|e| (ns.type_.clone(), e))?;
            desired.push(DesiredNamespace {
                type_name: ns.type_.clone(),
                template,
                features: features.clone(),
            });
        }
        Ok(desired)
    }

    /// Make one change towards the desired namespaces.
    ///
    /// Returns `true` when a namespace was created, updated or deleted, and
    /// `false` once every namespace is current.
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name_any()))]
    pub async fn ensure(&self, tenant: &mut TenantEnvironment) -> Result<bool> {
        let name = tenant.name_any();

        let observed = match self.list_owned(&name).await {
            Ok(observed) => observed,
            Err(e) => {
                let context = format!("failed to list namespaces with label owner '{name}'");
                return Err(self
                    .status
                    .fail_with(tenant, ReadyReason::UnableToProvision, e, context)
                    .await);
            }
        };

        let desired = match self.desired(tenant).await {
            Ok(desired) => desired,
            Err((type_name, e)) => {
                let context =
                    format!("failed to retrieve TierTemplate for namespace type '{type_name}'");
                return Err(self
                    .status
                    .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                    .await);
            }
        };

        let action = plan_namespaces(&desired, &observed);
        let action_name = action.name();
        match action {
            PlannedAction::NoAction => {
                debug!("no more namespaces to create or update");
                Ok(false)
            }
            PlannedAction::DeleteNamespace { namespace } => {
                self.status.updating_unless_provisioning(tenant).await?;
                info!(namespace = %namespace.name_any(), "deleting namespace no longer in the tier");
                if let Err(e) = self.applier().delete(&namespace).await {
                    let context = format!("failed to delete namespace {}", namespace.name_any());
                    return Err(self
                        .status
                        .fail_with(tenant, ReadyReason::UpdateFailed, e, context)
                        .await);
                }
                self.ctx.record_action(action_name);
                Ok(true)
            }
            PlannedAction::CreateNamespace {
                type_name,
                template,
            } => {
                self.report_progress(tenant, &observed).await?;
                self.create_namespace(tenant, &type_name, &template).await?;
                self.ctx.record_action(action_name);
                Ok(true)
            }
            PlannedAction::UpdateNamespaceInnerResources {
                type_name,
                template,
                namespace,
            } => {
                self.report_progress(tenant, &observed).await?;
                self.update_namespace(tenant, &type_name, &template, namespace)
                    .await?;
                self.ctx.record_action(action_name);
                Ok(true)
            }
            // Cluster-scoped actions are never planned for namespaces
            _ => Ok(false),
        }
    }

    /// Provisioning while the tenant has no namespace yet, Updating afterwards
    async fn report_progress(
        &self,
        tenant: &mut TenantEnvironment,
        observed: &[DynamicObject],
    ) -> Result<()> {
        if observed.is_empty() {
            self.status.provisioning_unless_updating(tenant).await
        } else {
            self.status.updating_unless_provisioning(tenant).await
        }
    }

    /// The Namespace object of a template
    fn render_namespace(
        &self,
        tenant: &TenantEnvironment,
        template: &TierTemplate,
    ) -> Result<DynamicObject> {
        self.ctx
            .render_for(tenant, template, ScopeFilter::NamespaceOnly)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::RenderError {
                template: template.template_ref.clone(),
                reason: "template has no Namespace object".to_string(),
            })
    }

    /// Create the namespace object only. Inner objects follow on a later pass.
    async fn create_namespace(
        &self,
        tenant: &mut TenantEnvironment,
        type_name: &str,
        template: &TierTemplate,
    ) -> Result<()> {
        let name = tenant.name_any();
        let namespace = match self.render_namespace(tenant, template) {
            Ok(namespace) => namespace,
            Err(e) => {
                let context =
                    format!("failed to process template for namespace type '{type_name}'");
                return Err(self
                    .status
                    .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                    .await);
            }
        };

        info!(namespace = %namespace.name_any(), type_name, "creating namespace");
        let labels = namespace_creation_labels(&name, type_name);
        if let Err(e) = self.applier().apply_one(&namespace, &labels).await {
            let context = format!("failed to create namespace with type '{type_name}'");
            return Err(self
                .status
                .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                .await);
        }
        Ok(())
    }

    /// Bring an existing namespace to the desired template revision.
    ///
    /// Each step that changes something ends the pass: a stale namespace
    /// object is re-applied, then redundant objects of the previous revision
    /// or of disabled features are removed one at a time, and finally the new
    /// inner objects are applied and the namespace is labelled with the new
    /// revision and features.
    async fn update_namespace(
        &self,
        tenant: &mut TenantEnvironment,
        type_name: &str,
        template: &TierTemplate,
        namespace: DynamicObject,
    ) -> Result<()> {
        let name = tenant.name_any();
        let ns_name = namespace.name_any();
        let applier = self.applier();

        let expected = match self.render_namespace(tenant, template) {
            Ok(expected) => expected,
            Err(e) => {
                let context =
                    format!("failed to get namespace object from template for namespace type '{type_name}'");
                return Err(self
                    .status
                    .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                    .await);
            }
        };
        let has_template_labels = expected
            .labels()
            .iter()
            .all(|(k, v)| namespace.labels().get(k) == Some(v));
        if !has_template_labels {
            info!(namespace = %ns_name, "namespace is missing labels from its template, re-applying it");
            let labels = namespace_creation_labels(&name, type_name);
            if let Err(e) = applier.apply_one(&expected, &labels).await {
                let context = format!("failed to update namespace '{ns_name}'");
                return Err(self
                    .status
                    .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                    .await);
            }
            return Ok(());
        }

        let new_objects = match self
            .ctx
            .render_for(tenant, template, ScopeFilter::AllButNamespaces)
        {
            Ok(objects) => objects,
            Err(e) => {
                let context = format!("failed to process template for namespace '{ns_name}'");
                return Err(self
                    .status
                    .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                    .await);
            }
        };

        let features = enabled_features_key(tenant.annotations());
        let applied_features = namespace
            .annotations()
            .get(APPLIED_FEATURES_ANNOTATION)
            .cloned()
            .unwrap_or_default();
        let current_ref = label(namespace.labels(), LABEL_TEMPLATE_REF).to_string();
        if !current_ref.is_empty()
            && (current_ref != template.template_ref || applied_features != features)
        {
            debug!(namespace = %ns_name, current_ref, "checking for redundant objects");
            match self.delete_redundant(tenant, &current_ref, &new_objects).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err((e, context)) => {
                    return Err(self
                        .status
                        .fail_with(tenant, ReadyReason::UpdateFailed, e, context)
                        .await);
                }
            }
        }

        if let Err(e) = applier
            .apply(&new_objects, &inner_object_labels(&name))
            .await
        {
            let context = format!("failed to provision namespace '{ns_name}' with required resources");
            return Err(self
                .status
                .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                .await);
        }

        let mut labelled = namespace;
        labelled.labels_mut().extend(namespace_revision_labels(
            &template.tier_name,
            &template.template_ref,
            &template.revision,
        ));
        if features.is_empty() {
            labelled.annotations_mut().remove(APPLIED_FEATURES_ANNOTATION);
        } else {
            labelled
                .annotations_mut()
                .insert(APPLIED_FEATURES_ANNOTATION.to_string(), features);
        }
        if let Err(e) = self.ctx.store.update(&labelled).await {
            let context = format!("failed to update namespace '{ns_name}'");
            return Err(self
                .status
                .fail_with(tenant, ReadyReason::UnableToProvisionNamespace, e, context)
                .await);
        }
        info!(namespace = %ns_name, template_ref = %template.template_ref, "namespace provisioned with all required resources");
        Ok(())
    }

    /// Delete one object the previous template may have created that the new
    /// render does not contain. Objects of every feature are considered, so
    /// that disabling a feature removes its objects.
    async fn delete_redundant(
        &self,
        tenant: &TenantEnvironment,
        current_ref: &str,
        new_objects: &[DynamicObject],
    ) -> std::result::Result<bool, (Error, String)> {
        let current = self.session.resolve(current_ref).await.map_err(|e| {
            let context = format!("failed to retrieve current TierTemplate with name '{current_ref}'");
            (e, context)
        })?;
        let current_objects = self
            .ctx
            .render_unfiltered(tenant, &current, ScopeFilter::AllButNamespaces)
            .map_err(|e| {
                let context =
                    format!("failed to process template for TierTemplate with name '{current_ref}'");
                (e, context)
            })?;
        self.applier()
            .delete_redundant_objects(&current_objects, new_objects)
            .await
            .map_err(|e| (e, "failed to delete redundant objects".to_string()))
    }

    /// Delete the tenant's namespaces, one per call.
    ///
    /// Returns `true` once no namespace is left. Namespaces already being
    /// deleted are waited on, not deleted again.
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name_any()))]
    pub async fn ensure_deleted(&self, tenant: &TenantEnvironment) -> Result<bool> {
        let name = tenant.name_any();
        let mut namespaces = self
            .list_owned(&name)
            .await
            .with_context(|| format!("failed to list namespaces with label owner '{name}'"))?;
        if namespaces.is_empty() {
            return Ok(true);
        }
        namespaces.sort_by_key(|ns| ns.name_any());

        if let Some(namespace) = namespaces.iter().find(|ns| !is_terminating(ns)) {
            info!(namespace = %namespace.name_any(), "deleting namespace");
            self.applier()
                .delete(namespace)
                .await
                .with_context(|| format!("failed to delete user namespace '{}'", namespace.name_any()))?;
            self.ctx.record_action("delete_namespace");
        } else {
            debug!("waiting for terminating namespaces to go away");
        }
        Ok(false)
    }
}
