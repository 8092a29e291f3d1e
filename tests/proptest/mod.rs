// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for the planners and the Ready transition table
//!
//! These tests use proptest to generate random desired and observed states
//! and verify that:
//! 1. Planning is deterministic (same input = same action)
//! 2. Deletions always come before creations and updates
//! 3. Each action touches a single object
//! 4. Applying planned actions one at a time converges on the desired state
//! 5. Every pair of Ready reasons has a defined outcome

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use proptest::prelude::*;
use serde_json::json;

use tenant_operator::controller::plan::{
    DesiredNamespace, PlannedAction, plan_cluster_resources, plan_namespaces,
};
use tenant_operator::controller::state_machine::{ReadyReason, ReadyTransitions, TransitionResult};
use tenant_operator::crd::TemplateBody;
use tenant_operator::resources::{
    LABEL_OWNER, LABEL_REVISION, LABEL_TEMPLATE_REF, LABEL_TIER, LABEL_TYPE, namespace_gvk,
};
use tenant_operator::templates::TierTemplate;

const TYPES: [&str; 5] = ["dev", "code", "stage", "test", "old"];

// =============================================================================
// Helpers
// =============================================================================

fn template(type_name: &str, revision: &str) -> TierTemplate {
    TierTemplate {
        template_ref: format!("basic-{type_name}-{revision}"),
        tier_name: "basic".to_string(),
        type_name: type_name.to_string(),
        revision: revision.to_string(),
        body: TemplateBody::default(),
    }
}

fn namespace(type_name: &str, revision: Option<&str>, phase: &str) -> DynamicObject {
    let mut ns = DynamicObject::new(
        &format!("john-{type_name}"),
        &ApiResource::from_gvk(&namespace_gvk()),
    );
    let labels = ns.labels_mut();
    labels.insert(LABEL_OWNER.to_string(), "john".to_string());
    labels.insert(LABEL_TYPE.to_string(), type_name.to_string());
    if let Some(revision) = revision {
        labels.insert(LABEL_TIER.to_string(), "basic".to_string());
        labels.insert(
            LABEL_TEMPLATE_REF.to_string(),
            format!("basic-{type_name}-{revision}"),
        );
        labels.insert(LABEL_REVISION.to_string(), revision.to_string());
    }
    ns.data = json!({ "status": { "phase": phase } });
    ns
}

fn quota(name: &str, template_ref: &str) -> DynamicObject {
    let gvk = GroupVersionKind::gvk("quota.openshift.io", "v1", "ClusterResourceQuota");
    let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(&gvk));
    let labels = obj.labels_mut();
    labels.insert(LABEL_OWNER.to_string(), "john".to_string());
    labels.insert(LABEL_TIER.to_string(), "basic".to_string());
    labels.insert(LABEL_TEMPLATE_REF.to_string(), template_ref.to_string());
    obj
}

fn summary(action: &PlannedAction) -> (&'static str, Option<String>) {
    (action.name(), action.target())
}

/// Apply a namespace action to an observed state, like the store would
fn apply_namespace_action(observed: &mut Vec<DynamicObject>, action: &PlannedAction) {
    match action {
        PlannedAction::CreateNamespace { type_name, .. } => {
            observed.push(namespace(type_name, None, "Active"));
        }
        PlannedAction::UpdateNamespaceInnerResources {
            type_name,
            template,
            namespace: ns,
        } => {
            let name = ns.name_any();
            observed.retain(|o| o.name_any() != name);
            observed.push(namespace(type_name, Some(&template.revision), "Active"));
        }
        PlannedAction::DeleteNamespace { namespace: ns } => {
            let name = ns.name_any();
            observed.retain(|o| o.name_any() != name);
        }
        _ => {}
    }
}

fn apply_cluster_action(observed: &mut Vec<DynamicObject>, action: &PlannedAction, current: &str) {
    match action {
        PlannedAction::CreateClusterResource { object } => {
            observed.push(quota(&object.name_any(), current));
        }
        PlannedAction::UpdateClusterResource { object } => {
            let name = object.name_any();
            observed.retain(|o| o.name_any() != name);
            observed.push(quota(&name, current));
        }
        PlannedAction::DeleteClusterResource { object } => {
            let name = object.name_any();
            observed.retain(|o| o.name_any() != name);
        }
        _ => {}
    }
}

// =============================================================================
// Strategy generators
// =============================================================================

fn revision_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("v1".to_string()), Just("v2".to_string())]
}

/// Desired namespaces with distinct types, in random order
fn desired_strategy() -> impl Strategy<Value = Vec<DesiredNamespace>> {
    (
        Just(TYPES[..4].to_vec()).prop_shuffle(),
        0usize..=4,
        prop::collection::vec(revision_strategy(), 4),
    )
        .prop_map(|(types, count, revisions)| {
            types
                .into_iter()
                .take(count)
                .zip(revisions)
                .map(|(type_name, revision)| DesiredNamespace {
                    type_name: type_name.to_string(),
                    template: template(type_name, &revision),
                    features: String::new(),
                })
                .collect()
        })
}

/// Observed active namespaces with distinct types and random revision labels
fn observed_strategy() -> impl Strategy<Value = Vec<DynamicObject>> {
    prop::collection::btree_map(
        prop::sample::select(TYPES.to_vec()),
        prop::option::of(revision_strategy()),
        0..=3,
    )
    .prop_map(|observed| {
        observed
            .into_iter()
            .map(|(type_name, revision)| namespace(type_name, revision.as_deref(), "Active"))
            .collect()
    })
}

/// Observed cluster objects: names q0..q5 labelled with random template refs
fn observed_cluster_strategy() -> impl Strategy<Value = Vec<DynamicObject>> {
    prop::collection::btree_map(
        0usize..6,
        prop_oneof![
            Just("basic-clusterresources-v1"),
            Just("basic-clusterresources-v2")
        ],
        0..=4,
    )
    .prop_map(|observed| {
        observed
            .into_iter()
            .map(|(i, template_ref)| quota(&format!("q{i}"), template_ref))
            .collect()
    })
}

fn reason_strategy() -> impl Strategy<Value = ReadyReason> {
    prop::sample::select(ReadyReason::ALL.to_vec())
}

// =============================================================================
// Namespace planner properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn planning_is_deterministic(desired in desired_strategy(), observed in observed_strategy()) {
        let first = plan_namespaces(&desired, &observed);
        let second = plan_namespaces(&desired, &observed);
        prop_assert_eq!(summary(&first), summary(&second));
    }

    #[test]
    fn undesired_namespaces_are_deleted_first(
        desired in desired_strategy(),
        observed in observed_strategy(),
    ) {
        let desired_types: BTreeSet<&str> =
            desired.iter().map(|d| d.type_name.as_str()).collect();
        let has_undesired = observed.iter().any(|ns| {
            !desired_types.contains(ns.labels().get(LABEL_TYPE).map(String::as_str).unwrap_or_default())
        });

        let action = plan_namespaces(&desired, &observed);
        prop_assert_eq!(action.is_deletion(), has_undesired);
    }

    #[test]
    fn terminating_namespaces_are_never_planned(
        desired in desired_strategy(),
        observed in observed_strategy(),
    ) {
        let terminating: Vec<DynamicObject> = observed
            .iter()
            .map(|ns| {
                let mut ns = ns.clone();
                ns.data = json!({ "status": { "phase": "Terminating" } });
                ns
            })
            .collect();

        let action = plan_namespaces(&desired, &terminating);
        let observed_types: BTreeSet<String> = terminating
            .iter()
            .filter_map(|ns| ns.labels().get(LABEL_TYPE).cloned())
            .collect();
        match action {
            PlannedAction::NoAction => {}
            PlannedAction::CreateNamespace { type_name, .. } => {
                prop_assert!(!observed_types.contains(&type_name));
            }
            other => prop_assert!(false, "unexpected action {}", other.name()),
        }
    }

    #[test]
    fn each_action_changes_one_namespace(
        desired in desired_strategy(),
        observed in observed_strategy(),
    ) {
        let mut after = observed.clone();
        let action = plan_namespaces(&desired, &observed);
        apply_namespace_action(&mut after, &action);

        let before: BTreeMap<String, BTreeMap<String, String>> = observed
            .iter()
            .map(|ns| (ns.name_any(), ns.labels().clone()))
            .collect();
        let after: BTreeMap<String, BTreeMap<String, String>> = after
            .iter()
            .map(|ns| (ns.name_any(), ns.labels().clone()))
            .collect();
        let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        let changed = names
            .into_iter()
            .filter(|name| before.get(*name) != after.get(*name))
            .count();
        prop_assert!(changed <= 1);
        prop_assert_eq!(changed == 0, matches!(action, PlannedAction::NoAction));
    }

    #[test]
    fn namespaces_converge_from_any_observed_state(
        desired in desired_strategy(),
        observed in observed_strategy(),
    ) {
        let bound = 2 * desired.len() + observed.len() + 1;
        let mut state = observed;
        let mut steps = 0;
        loop {
            let action = plan_namespaces(&desired, &state);
            if matches!(action, PlannedAction::NoAction) {
                break;
            }
            apply_namespace_action(&mut state, &action);
            steps += 1;
            prop_assert!(steps <= bound, "no convergence after {} steps", steps);
        }

        prop_assert_eq!(state.len(), desired.len());
        for d in &desired {
            let ns = state
                .iter()
                .find(|ns| ns.labels().get(LABEL_TYPE) == Some(&d.type_name));
            prop_assert!(ns.is_some());
            prop_assert_eq!(
                ns.and_then(|ns| ns.labels().get(LABEL_REVISION)),
                Some(&d.template.revision)
            );
        }
    }
}

// =============================================================================
// Cluster resource planner properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn cluster_resources_converge(
        rendered_count in 0usize..4,
        observed in observed_cluster_strategy(),
        has_template in any::<bool>(),
    ) {
        let current = template("clusterresources", "v2");
        let rendered: Vec<DynamicObject> = if has_template {
            (0..rendered_count).map(|i| quota(&format!("q{i}"), "")).collect()
        } else {
            Vec::new()
        };
        let desired = has_template.then_some(&current);

        let bound = observed.len() + 2 * rendered.len() + 1;
        let mut state = observed;
        let mut steps = 0;
        let mut seen_create_or_update = false;
        loop {
            let action = plan_cluster_resources(desired, &rendered, &state);
            match &action {
                PlannedAction::NoAction => break,
                PlannedAction::DeleteClusterResource { .. } => {
                    prop_assert!(!seen_create_or_update, "deletion planned after a create or update");
                }
                _ => seen_create_or_update = true,
            }
            apply_cluster_action(&mut state, &action, &current.template_ref);
            steps += 1;
            prop_assert!(steps <= bound, "no convergence after {} steps", steps);
        }

        let names: BTreeSet<String> = state.iter().map(|o| o.name_any()).collect();
        let expected: BTreeSet<String> = rendered.iter().map(|o| o.name_any()).collect();
        prop_assert_eq!(names, expected);
        for obj in &state {
            prop_assert_eq!(
                obj.labels().get(LABEL_TEMPLATE_REF),
                Some(&current.template_ref)
            );
        }
    }
}

// =============================================================================
// Ready transition table
// =============================================================================

proptest! {
    #[test]
    fn every_transition_has_an_outcome(
        current in prop::option::of(reason_strategy()),
        requested in reason_strategy(),
    ) {
        let table = ReadyTransitions::new();
        let suppressed = matches!(
            (current, requested),
            (Some(ReadyReason::Updating), ReadyReason::Provisioning)
                | (Some(ReadyReason::Provisioning), ReadyReason::Updating)
        );

        match table.evaluate(current, requested) {
            TransitionResult::Apply { from, to } => {
                prop_assert!(!suppressed);
                prop_assert_eq!(from, current);
                prop_assert_eq!(to, requested);
            }
            TransitionResult::Suppressed { current: c, requested: r, .. } => {
                prop_assert!(suppressed);
                prop_assert_eq!(Some(c), current);
                prop_assert_eq!(r, requested);
            }
        }
    }
}
