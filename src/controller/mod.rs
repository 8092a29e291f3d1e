pub mod applier;
pub mod cluster_resources;
pub mod context;
pub mod error;
pub mod namespaces;
pub mod plan;
pub mod reconciler;
pub mod state_machine;
pub mod status;

pub use applier::ResourceApplier;
pub use cluster_resources::ClusterResourcesManager;
pub use context::Context;
pub use error::{Error, Result, ResultExt};
pub use namespaces::NamespacesManager;
pub use plan::{DesiredNamespace, PlannedAction, plan_cluster_resources, plan_namespaces};
pub use reconciler::{FINALIZER, Outcome, TenantReconciler, error_policy, reconcile};
pub use state_machine::{ReadyReason, ReadyTransitions, TransitionResult};
pub use status::{ConditionBuilder, StatusManager, ready_reason};
