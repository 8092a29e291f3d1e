//! Status and conditions management for TenantEnvironment resources
//!
//! Every outcome of a pass ends up as the reason of the single Ready
//! condition. Writes are skipped when nothing would change, and requested
//! reasons go through [`ReadyTransitions`] first.

use std::collections::BTreeMap;

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, error};

use super::error::{Error, Result};
use super::state_machine::{ReadyReason, ReadyTransitions, TransitionResult};
use crate::crd::{
    Condition, ProvisionedNamespace, RecordedRevisions, TenantEnvironment,
    TenantEnvironmentStatus,
};
use crate::resources::labels::{LABEL_TYPE, label};
use crate::resources::{namespace_gvk, owner_selector};
use crate::store::ObjectStore;

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Tenant environment is fully provisioned
    pub const READY: &str = "Ready";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    /// The transition time only moves when the status flips.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, reason: ReadyReason, message: &str) -> Self {
        let status = if reason.is_ready() {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason.as_str(), message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Current Ready reason of a tenant, `None` without a (recognized) condition
pub fn ready_reason(tenant: &TenantEnvironment) -> Option<ReadyReason> {
    tenant
        .ready_condition()
        .and_then(|c| c.reason.parse::<ReadyReason>().ok())
}

/// Status manager for TenantEnvironment resources
pub struct StatusManager<'a> {
    store: &'a dyn ObjectStore,
    transitions: ReadyTransitions,
}

impl<'a> StatusManager<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            transitions: ReadyTransitions::new(),
        }
    }

    /// Set the Ready condition, subject to the transition table.
    ///
    /// Returns `Ok(())` without writing when the request is suppressed or the
    /// condition already has this content.
    pub async fn set_ready(
        &self,
        tenant: &mut TenantEnvironment,
        reason: ReadyReason,
        message: &str,
    ) -> Result<()> {
        let result = self.transitions.evaluate(ready_reason(tenant), reason);
        if let TransitionResult::Suppressed { description, .. } = result {
            debug!(tenant = %tenant.name_any(), requested = %reason, description, "Ready transition suppressed");
            return Ok(());
        }

        let existing = tenant.conditions().to_vec();
        let conditions = ConditionBuilder::from_existing(existing, tenant.metadata.generation)
            .ready(reason, message)
            .build();
        let unchanged = tenant.ready_condition().is_some_and(|current| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_types::READY && c.same_content(current))
        });
        if unchanged {
            return Ok(());
        }

        let mut status = tenant.status.clone().unwrap_or_default();
        status.conditions = conditions;
        self.write(tenant, status).await
    }

    async fn write(&self, tenant: &mut TenantEnvironment, status: TenantEnvironmentStatus) -> Result<()> {
        let previous = tenant.status.replace(status);
        if let Err(e) = self.store.update_tenant_status(tenant).await {
            // Keep the in-memory view in line with what is stored
            tenant.status = previous;
            return Err(e.context(format!(
                "unable to update status of TenantEnvironment '{}'",
                tenant.name_any()
            )));
        }
        Ok(())
    }

    pub async fn provisioning_unless_updating(&self, tenant: &mut TenantEnvironment) -> Result<()> {
        self.set_ready(tenant, ReadyReason::Provisioning, "").await
    }

    pub async fn updating_unless_provisioning(&self, tenant: &mut TenantEnvironment) -> Result<()> {
        self.set_ready(tenant, ReadyReason::Updating, "").await
    }

    pub async fn terminating(&self, tenant: &mut TenantEnvironment) -> Result<()> {
        self.set_ready(tenant, ReadyReason::Terminating, "").await
    }

    /// Mark the tenant Provisioned and record what it was provisioned with
    pub async fn provisioned(&self, tenant: &mut TenantEnvironment) -> Result<()> {
        let provisioned_namespaces = self.provisioned_namespaces(tenant).await?;
        let revisions = RecordedRevisions {
            namespaces: tenant
                .spec
                .namespaces
                .iter()
                .map(|ns| (ns.type_.clone(), ns.template_ref.clone()))
                .collect::<BTreeMap<_, _>>(),
            cluster_resources: tenant
                .spec
                .cluster_resources
                .as_ref()
                .map(|c| c.template_ref.clone()),
        };

        let mut status = tenant.status.clone().unwrap_or_default();
        let same_ready = tenant
            .ready_condition()
            .is_some_and(|c| c.reason == ReadyReason::Provisioned.as_str() && c.message.is_empty());
        if !same_ready {
            status.conditions = ConditionBuilder::from_existing(
                status.conditions,
                tenant.metadata.generation,
            )
            .ready(ReadyReason::Provisioned, "")
            .build();
        }
        status.provisioned_namespaces = provisioned_namespaces;
        status.revisions = Some(revisions);

        if tenant.status.as_ref() == Some(&status) {
            return Ok(());
        }
        self.write(tenant, status).await
    }

    /// Namespaces of the tenant sorted by name. The first one is reported as
    /// the tenant's default namespace.
    async fn provisioned_namespaces(
        &self,
        tenant: &TenantEnvironment,
    ) -> Result<Vec<ProvisionedNamespace>> {
        let mut namespaces: Vec<ProvisionedNamespace> = self
            .store
            .list(&namespace_gvk(), &owner_selector(&tenant.name_any()))
            .await?
            .iter()
            .map(|ns| ProvisionedNamespace {
                name: ns.name_any(),
                type_: label(ns.labels(), LABEL_TYPE).to_string(),
            })
            .collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(first) = namespaces.first_mut() {
            first.type_ = "default".to_string();
        }
        Ok(namespaces)
    }

    /// Record a failure on the Ready condition and hand back the error with context.
    ///
    /// The condition message is the error text without the added context. A
    /// failing status write is logged and does not replace the original error.
    pub async fn fail_with(
        &self,
        tenant: &mut TenantEnvironment,
        reason: ReadyReason,
        err: Error,
        context: impl Into<String>,
    ) -> Error {
        let message = err.to_string();
        if let Err(status_err) = self.set_ready(tenant, reason, &message).await {
            error!(
                tenant = %tenant.name_any(),
                reason = %reason,
                error = %status_err,
                "unable to update status"
            );
        }
        err.context(context)
    }

    /// Failure of cluster-scoped work. A tenant that was being updated reports
    /// UpdateFailed, anything else reports UnableToProvisionClusterResources.
    ///
    /// The reason is read when the failure happens, so it includes any change
    /// made earlier in the same pass.
    pub async fn cluster_resource_failure(
        &self,
        tenant: &mut TenantEnvironment,
        err: Error,
        context: impl Into<String>,
    ) -> Error {
        let reason = match ready_reason(tenant) {
            Some(ReadyReason::Updating | ReadyReason::UpdateFailed) => ReadyReason::UpdateFailed,
            _ => ReadyReason::UnableToProvisionClusterResources,
        };
        self.fail_with(tenant, reason, err, context).await
    }
}
