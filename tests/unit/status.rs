//! Unit tests for Ready condition bookkeeping

use tenant_operator::controller::{ReadyReason, StatusManager};
use tenant_operator::store::StoreOp;

use crate::common::*;

#[tokio::test]
async fn test_converged_tenant_writes_nothing() {
    let h = Harness::new();
    h.seed(
        TenantBuilder::new("john")
            .namespace("dev", "basic-dev-v1")
            .namespace("code", "basic-code-v1")
            .cluster_resources("basic-clusterresources-v1")
            .build(),
    );
    h.converge("john").await;
    let tenant_writes = h.store.tenant_writes();
    let object_writes = h.store.object_writes();

    h.converge("john").await;
    h.converge("john").await;

    assert_eq!(h.store.tenant_writes(), tenant_writes);
    assert_eq!(h.store.object_writes(), object_writes);
}

#[tokio::test]
async fn test_same_condition_is_not_written_twice() {
    let h = Harness::new();
    h.seed(TenantBuilder::new("john").build());
    let status = StatusManager::new(h.store.as_ref());
    let mut tenant = h.tenant("john").unwrap();

    status
        .set_ready(&mut tenant, ReadyReason::Provisioning, "")
        .await
        .unwrap();
    let writes = h.store.tenant_writes();
    status
        .set_ready(&mut tenant, ReadyReason::Provisioning, "")
        .await
        .unwrap();

    assert_eq!(h.store.tenant_writes(), writes);
}

#[tokio::test]
async fn test_updating_does_not_replace_provisioning() {
    let h = Harness::new();
    h.seed(
        TenantBuilder::new("john")
            .namespace("dev", "basic-dev-v1")
            .namespace("code", "basic-code-v1")
            .build(),
    );

    // Creating the second namespace would ask for Updating
    for _ in 0..3 {
        h.pass("john").await.unwrap();
        assert_eq!(h.reason("john"), Some(ReadyReason::Provisioning));
    }
    assert_eq!(h.namespace_names(), vec!["john-code", "john-dev"]);
}

#[tokio::test]
async fn test_provisioning_does_not_replace_updating() {
    let h = Harness::new();
    h.seed(TenantBuilder::new("john").with_ready(ReadyReason::Updating).build());
    let status = StatusManager::new(h.store.as_ref());
    let mut tenant = h.tenant("john").unwrap();

    status.provisioning_unless_updating(&mut tenant).await.unwrap();

    assert_eq!(h.reason("john"), Some(ReadyReason::Updating));
    assert_eq!(h.store.tenant_writes(), 0);
}

#[tokio::test]
async fn test_transition_time_changes_only_on_status_flip() {
    let h = Harness::new();
    h.seed(TenantBuilder::new("john").with_ready(ReadyReason::Provisioning).build());
    let status = StatusManager::new(h.store.as_ref());
    let mut tenant = h.tenant("john").unwrap();

    status
        .set_ready(&mut tenant, ReadyReason::UnableToProvision, "boom")
        .await
        .unwrap();
    let ready = h.ready("john");
    assert_eq!(ready.last_transition_time, "2024-01-01T00:00:00Z");
    assert_eq!(ready.message, "boom");

    status
        .set_ready(&mut tenant, ReadyReason::Provisioned, "")
        .await
        .unwrap();
    assert_ne!(h.ready("john").last_transition_time, "2024-01-01T00:00:00Z");
    assert_eq!(h.ready("john").status, "True");
}

#[tokio::test]
async fn test_status_write_failure_stops_the_pass() {
    let h = Harness::new();
    h.seed(TenantBuilder::new("john").namespace("dev", "basic-dev-v1").build());
    h.store.fail_on(StoreOp::UpdateTenantStatus, None);

    let err = h.pass("john").await.unwrap_err();

    assert!(
        err.to_string()
            .contains("unable to update status of TenantEnvironment 'john'")
    );
    assert!(h.namespace_names().is_empty());
    assert!(h.tenant("john").unwrap().status.is_none());
}

#[tokio::test]
async fn test_failed_status_write_keeps_original_error() {
    let h = Harness::new();
    h.seed(
        TenantBuilder::new("john")
            .namespace("dev", "basic-dev-v1")
            .with_finalizer()
            .with_ready(ReadyReason::Provisioning)
            .build(),
    );
    h.store.fail_on(StoreOp::Create, Some("Namespace"));
    h.store.fail_on(StoreOp::UpdateTenantStatus, None);

    let err = h.pass("john").await.unwrap_err();

    assert!(err.to_string().contains("failed to create namespace with type 'dev'"));
    assert_eq!(h.reason("john"), Some(ReadyReason::Provisioning));
}
