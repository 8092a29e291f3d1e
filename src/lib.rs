pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;
pub mod templates;

pub use config::{EngineConfig, OperatorConfig};
pub use controller::{Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::{TenantEnvironment, TierTemplateResource};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

/// Run the TenantEnvironment controller.
///
/// When `namespace` is `Some(ns)`, only watches tenants in that namespace.
/// When `namespace` is `None`, watches tenants cluster-wide.
pub async fn run_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for TenantEnvironment resources (scope: {})",
        scope_msg
    );

    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    let tenants: Api<TenantEnvironment> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    // Children are found by label and requeued on a timer, so only tenants are watched
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(tenants, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::error!("Controller stream ended unexpectedly");
}
