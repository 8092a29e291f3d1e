use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use super::cluster_resources::ClusterResourcesManager;
use super::context::Context;
use super::error::{Error, Result};
use super::namespaces::NamespacesManager;
use super::state_machine::ReadyReason;
use super::status::StatusManager;
use crate::crd::TenantEnvironment;

/// Finalizer name for TenantEnvironment resources
pub const FINALIZER: &str = "tenancy.example.com/finalizer";

/// What a single pass achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// One object was created, updated or deleted; more work may follow
    Changed,
    /// Every owned object matches its template and the tenant is Provisioned
    Converged,
    /// Deletion is in progress
    Deprovisioning,
    /// All children are gone and the finalizer was released
    Removed,
}

/// Reconcile a TenantEnvironment resource
#[instrument(skip(tenant, ctx), fields(name = %tenant.name_any(), namespace = tenant.namespace().unwrap_or_default()))]
pub async fn reconcile(tenant: Arc<TenantEnvironment>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let ns = tenant.namespace().unwrap_or_default();
    let name = tenant.name_any();

    // The watch cache may lag behind, act on the stored record
    let Some(mut current) = ctx.store.get_tenant(&ns, &name).await? else {
        debug!("TenantEnvironment no longer exists");
        return Ok(Action::await_change());
    };

    let result = TenantReconciler::new(&ctx).reconcile_tenant(&mut current).await;

    if let Some(ref health) = ctx.health_state {
        health
            .metrics
            .record_reconcile(&ns, &name, start.elapsed().as_secs_f64());
    }

    let outcome = result?;
    debug!(?outcome, "reconciliation pass finished");
    Ok(match outcome {
        Outcome::Changed | Outcome::Deprovisioning => Action::requeue(ctx.config.step_requeue),
        Outcome::Converged => Action::requeue(ctx.config.resync),
        Outcome::Removed => Action::await_change(),
    })
}

/// Error policy for the controller.
///
/// Every failure is retried on the next invocation after a fixed delay.
pub fn error_policy(tenant: Arc<TenantEnvironment>, error: &Error, ctx: Arc<Context>) -> Action {
    let ns = tenant.namespace().unwrap_or_default();
    let name = tenant.name_any();
    let delay = ctx.config.error_requeue;

    if let Some(ref health) = ctx.health_state {
        health.metrics.record_error(&ns, &name);
    }

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// Drives one tenant a single step closer to its spec
pub struct TenantReconciler<'a> {
    ctx: &'a Context,
}

impl<'a> TenantReconciler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Run one pass over a tenant record.
    ///
    /// At most one child object is created, updated or deleted. Status and
    /// finalizer changes are written to the store and reflected in `tenant`.
    pub async fn reconcile_tenant(&self, tenant: &mut TenantEnvironment) -> Result<Outcome> {
        let session = self.ctx.resolver.session();
        let cluster = ClusterResourcesManager::new(self.ctx, &session);
        let namespaces = NamespacesManager::new(self.ctx, &session);

        if tenant.metadata.deletion_timestamp.is_some() {
            return self.handle_deletion(tenant, &cluster, &namespaces).await;
        }

        if !has_finalizer(tenant) {
            self.add_finalizer(tenant).await?;
        }

        if cluster.ensure(tenant).await? {
            return Ok(Outcome::Changed);
        }
        if namespaces.ensure(tenant).await? {
            return Ok(Outcome::Changed);
        }

        StatusManager::new(self.ctx.store.as_ref())
            .provisioned(tenant)
            .await?;
        debug!("TenantEnvironment is provisioned");
        Ok(Outcome::Converged)
    }

    async fn add_finalizer(&self, tenant: &mut TenantEnvironment) -> Result<()> {
        info!("Adding finalizer");
        tenant
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FINALIZER.to_string());
        self.ctx.store.update_tenant_finalizers(tenant).await
    }

    /// Delete namespaces first, then cluster-scoped objects, then release the finalizer
    async fn handle_deletion(
        &self,
        tenant: &mut TenantEnvironment,
        cluster: &ClusterResourcesManager<'_>,
        namespaces: &NamespacesManager<'_>,
    ) -> Result<Outcome> {
        if !has_finalizer(tenant) {
            return Ok(Outcome::Removed);
        }
        let status = StatusManager::new(self.ctx.store.as_ref());

        if let Err(e) = status.terminating(tenant).await {
            return Err(status
                .fail_with(tenant, ReadyReason::TerminatingFailed, e, "failed to set status to 'Terminating'")
                .await);
        }

        match namespaces.ensure_deleted(tenant).await {
            Ok(true) => {}
            Ok(false) => return self.check_deletion_deadline(tenant, &status).await,
            Err(e) => {
                return Err(status
                    .fail_with(tenant, ReadyReason::TerminatingFailed, e, "failed to ensure namespace deletion")
                    .await);
            }
        }

        match cluster.delete(tenant).await {
            Ok(true) => return Ok(Outcome::Deprovisioning),
            Ok(false) => {}
            Err(e) => {
                return Err(status
                    .fail_with(tenant, ReadyReason::TerminatingFailed, e, "failed to delete cluster resources")
                    .await);
            }
        }

        info!("Removing finalizer");
        let remaining: Vec<String> = tenant
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        tenant.metadata.finalizers = (!remaining.is_empty()).then_some(remaining);
        if let Err(e) = self.ctx.store.update_tenant_finalizers(tenant).await {
            return Err(status
                .fail_with(tenant, ReadyReason::TerminatingFailed, e, "failed to remove finalizer")
                .await);
        }
        Ok(Outcome::Removed)
    }

    /// Namespaces are still going away. Report a stall once deletion takes too long.
    async fn check_deletion_deadline(
        &self,
        tenant: &mut TenantEnvironment,
        status: &StatusManager<'_>,
    ) -> Result<Outcome> {
        let timeout = self.ctx.config.deletion_timeout;
        let elapsed = tenant
            .metadata
            .deletion_timestamp
            .as_ref()
            .map(|ts| Utc::now().signed_duration_since(ts.0))
            .and_then(|d| d.to_std().ok())
            .unwrap_or(Duration::ZERO);
        if elapsed > timeout {
            return Err(status
                .fail_with(
                    tenant,
                    ReadyReason::TerminatingFailed,
                    Error::DeletionStalled(timeout),
                    "failed to delete namespaces",
                )
                .await);
        }
        Ok(Outcome::Deprovisioning)
    }
}

/// Check if the tenant has our finalizer
fn has_finalizer(tenant: &TenantEnvironment) -> bool {
    tenant.finalizers().iter().any(|f| f == FINALIZER)
}
