//! Finalizer registration and deletion through the `delay` annotation

use std::time::Duration;

use kot::controller::DEFAULT_FINALIZER;
use kot::object::has_finalizer;
use kot_testing::Op;

use super::*;

fn has_marker(parent: &SimpleCrd) -> bool {
    has_finalizer(parent, DEFAULT_FINALIZER)
}

#[tokio::test]
async fn registers_the_marker_before_reconciling_children() {
    let env = Env::new();
    let parent = env.create_delayed_parent("parent", 60);

    env.reconcile("parent").await.unwrap();

    assert!(has_marker(&env.parent("parent").unwrap()));
    assert!(env.children(&env.config_maps, &parent).await.is_empty());

    env.reconcile("parent").await.unwrap();
    assert_eq!(env.children(&env.config_maps, &parent).await.len(), 1);
}

#[tokio::test]
async fn parents_without_enabled_finalizers_get_no_marker() {
    let env = Env::new();
    env.create_parent("parent", Some("cm-value"));

    env.settle("parent").await;

    assert!(!has_marker(&env.parent("parent").unwrap()));
}

#[tokio::test]
async fn marker_is_dropped_when_no_finalizer_is_enabled_anymore() {
    let env = Env::new();
    env.create_delayed_parent("parent", 60);
    env.settle("parent").await;
    assert!(has_marker(&env.parent("parent").unwrap()));

    env.edit_parent("parent", |p| p.metadata.annotations = None).await;
    env.reconcile("parent").await.unwrap();

    assert!(!has_marker(&env.parent("parent").unwrap()));
}

#[tokio::test]
async fn pending_finalization_holds_deletion_and_requeues() {
    let env = Env::new();
    let parent = env.create_delayed_parent("parent", 3600);
    env.settle("parent").await;
    env.parents.delete(&parent).await.unwrap();

    let schedule = env.reconcile("parent").await.unwrap();

    let delay = schedule.requeue_after.expect("requeue while finalizing");
    assert!(delay > Duration::from_secs(3500));
    assert!(delay <= Duration::from_secs(3601));

    let stored = env.parent("parent").expect("deletion is held");
    assert!(has_marker(&stored));
    assert!(stored.metadata.deletion_timestamp.is_some());
    assert!(stored.status.unwrap().finalizing);
    assert_eq!(env.children(&env.config_maps, &parent).await.len(), 1);
}

#[tokio::test]
async fn finished_finalization_releases_the_parent() {
    let env = Env::new();
    let parent = env.create_delayed_parent("parent", 0);
    env.settle("parent").await;
    env.parents.delete(&parent).await.unwrap();
    env.parents.reset_calls();
    env.config_maps.reset_calls();

    let schedule = env.reconcile("parent").await.unwrap();

    assert_eq!(schedule, Schedule::default());
    assert!(env.parent("parent").is_none());
    assert_eq!(env.config_maps.writes(), 0);
    assert_eq!(env.parents.calls(Op::UpdateStatus), 0);
}

#[tokio::test]
async fn deleted_parents_without_marker_are_not_found() {
    let env = Env::new();
    let parent = env.create_parent("parent", Some("cm-value"));
    env.settle("parent").await;
    env.parents.delete(&parent).await.unwrap();

    let schedule = env.reconcile("parent").await.unwrap();

    assert_eq!(schedule, Schedule::default());
    assert!(env.parent("parent").is_none());
}

#[tokio::test]
async fn finalizer_errors_abort_the_pass_and_keep_the_marker() {
    let env = Env::new();
    env.create_delayed_parent("parent", 60);
    env.settle("parent").await;
    env.edit_parent("parent", |p| {
        p.metadata.annotations = Some([("delay".to_string(), "soon".to_string())].into());
    })
    .await;
    let parent = env.parent("parent").unwrap();
    env.parents.delete(&parent).await.unwrap();
    env.parents.reset_calls();

    let err = env.reconcile("parent").await.unwrap_err();

    assert!(err.to_string().starts_with("invalid delay"));
    assert!(has_marker(&env.parent("parent").unwrap()));
    assert_eq!(env.parents.calls(Op::UpdateStatus), 0);
}
