//! Whole passes: error isolation, scheduling and settling

use std::sync::atomic::Ordering;

use kot::TypeKey;
use kot_testing::Op;

use super::*;

#[tokio::test]
async fn failing_reconciler_does_not_stop_the_others() {
    let env = Env::new();
    let parent = env.create_parent("parent", Some("boom"));

    let err = env.reconcile("parent").await.unwrap_err();

    assert_eq!(
        err.to_string(),
        r#"one or more errors occurred: ["boom!!!!"]"#
    );
    assert!(env.children(&env.config_maps, &parent).await.is_empty());
    assert_eq!(env.children(&env.accounts, &parent).await.len(), 1);
    assert_eq!(env.children(&env.secrets, &parent).await.len(), 1);
    assert_eq!(env.parents.calls(Op::UpdateStatus), 0);
}

#[tokio::test]
async fn recovers_once_the_failure_is_fixed() {
    let env = Env::new();
    let parent = env.create_parent("parent", Some("boom"));
    env.reconcile("parent").await.unwrap_err();

    env.edit_parent("parent", |p| p.spec.config_map_value = Some("fixed".to_string()))
        .await;
    env.settle("parent").await;

    assert_eq!(env.children(&env.config_maps, &parent).await.len(), 1);
    assert_eq!(
        env.parent("parent")
            .and_then(|p| p.status)
            .and_then(|s| s.known_config_map_value)
            .as_deref(),
        Some("fixed")
    );
}

#[tokio::test]
async fn missing_parent_is_a_no_op() {
    let env = Env::new();

    let schedule = env.reconcile("nobody").await.unwrap();

    assert_eq!(schedule, Schedule::default());
    assert_eq!(env.writes(), 0);
}

#[tokio::test]
async fn parent_read_failures_surface() {
    let env = Env::new();
    env.create_parent("parent", None);
    env.parents.fail_next(
        Op::Get,
        kot::StoreError::Unsupported("api server unavailable".to_string()),
    );

    let err = env.reconcile("parent").await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "failed to get SimpleCrd: unsupported operation: api server unavailable"
    );
    assert_eq!(env.writes(), 0);
}

#[tokio::test]
async fn custom_reconciler_sees_each_spec_value_until_reported() {
    let env = Env::new();
    env.create_parent("parent", Some("first"));

    env.settle("parent").await;
    assert_eq!(env.changes.load(Ordering::SeqCst), 1);

    env.edit_parent("parent", |p| p.spec.config_map_value = Some("second".to_string()))
        .await;
    env.settle("parent").await;
    assert_eq!(env.changes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn settled_parents_ask_for_nothing() {
    let env = Env::new();
    env.create_parent("parent", Some("cm-value"));

    let schedule = env.settle("parent").await;

    assert_eq!(schedule, Schedule::default());
}

#[tokio::test]
async fn cancelled_passes_stop_before_reading() {
    let env = Env::new();
    env.create_parent("parent", None);
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let err = env
        .controller
        .reconcile_with(&key("parent"), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err.error, Error::Cancelled { .. }));
    assert_eq!(env.parents.calls(Op::Get), 0);
}

#[test]
fn describes_its_reconcilers_and_children() {
    let env = Env::new();

    assert_eq!(env.controller.name(), "simple-crd");
    assert_eq!(
        env.controller.owned_kinds(),
        vec![
            TypeKey::of::<ConfigMap>(),
            TypeKey::of::<ServiceAccount>(),
            TypeKey::of::<Secret>(),
        ]
    );
    assert_eq!(env.controller.reconciler_names().len(), 4);
    assert!(env
        .controller
        .reconciler_names()
        .contains(&"count-changes".to_string()));
}
