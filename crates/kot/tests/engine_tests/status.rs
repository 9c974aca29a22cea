//! Status derivation and conditional status writes

use kot_testing::Op;

use super::*;

fn status_of(env: &Env, name: &str) -> SimpleCrdStatus {
    env.parent(name)
        .and_then(|parent| parent.status)
        .expect("status written")
}

#[tokio::test]
async fn reports_spec_values_and_constants() {
    let env = Env::new();
    env.create_parent("parent", Some("cm-value"));
    env.edit_parent("parent", |p| p.spec.secret_value = Some("s3cr3t".to_string()))
        .await;

    env.settle("parent").await;

    let status = status_of(&env, "parent");
    assert_eq!(status.static_value.as_deref(), Some(STATIC_VALUE));
    assert_eq!(status.known_config_map_value.as_deref(), Some("cm-value"));
    assert_eq!(status.known_secret_value.as_deref(), Some("s3cr3t"));
    assert_eq!(status.namespace_annotation, "");
    assert!(!status.finalizing);
}

#[tokio::test]
async fn follows_related_objects() {
    let env = Env::new();
    env.create_parent("parent", None);
    env.settle("parent").await;

    let mut ns = env.namespaces.peek(&ObjectKey::new(NAMESPACE)).unwrap();
    ns.metadata.annotations = Some([("misc".to_string(), "hello".to_string())].into());
    env.namespaces.update(&ns).await.unwrap();
    env.reconcile("parent").await.unwrap();

    assert_eq!(status_of(&env, "parent").namespace_annotation, "hello");
}

#[tokio::test]
async fn writes_only_when_the_status_changed() {
    let env = Env::new();
    env.create_parent("parent", Some("cm-value"));

    env.reconcile("parent").await.unwrap();
    assert_eq!(env.parents.calls(Op::UpdateStatus), 1);

    env.parents.reset_calls();
    env.reconcile("parent").await.unwrap();
    assert_eq!(env.parents.calls(Op::UpdateStatus), 0);

    env.edit_parent("parent", |p| p.spec.config_map_value = Some("other".to_string()))
        .await;
    env.parents.reset_calls();
    env.reconcile("parent").await.unwrap();
    assert_eq!(env.parents.calls(Op::UpdateStatus), 1);
    assert_eq!(
        status_of(&env, "parent").known_config_map_value.as_deref(),
        Some("other")
    );
}

#[tokio::test]
async fn status_writes_leave_the_spec_alone() {
    let env = Env::new();
    env.create_parent("parent", Some("cm-value"));
    env.settle("parent").await;

    let parent = env.parent("parent").unwrap();
    assert_eq!(parent.spec.config_map_value.as_deref(), Some("cm-value"));
    assert_eq!(env.parents.calls(Op::Update), 0);
}

#[tokio::test]
async fn resolver_errors_skip_the_write() {
    let env = Env::new();
    env.create_parent("parent", Some("cm-value"));
    env.namespaces.delete(&namespace(NAMESPACE)).await.unwrap();

    let err = env.reconcile("parent").await.unwrap_err();

    assert!(err.to_string().starts_with("failed to get namespace"));
    assert!(err.to_string().ends_with("not found"));
    assert_eq!(env.parents.calls(Op::UpdateStatus), 0);
    assert!(env.parent("parent").unwrap().status.is_none());
    assert_eq!(env.children(&env.config_maps, &env.parent("parent").unwrap()).await.len(), 1);
}
