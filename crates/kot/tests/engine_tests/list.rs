//! Collections of children: generated Secrets, one added per pass up to two

use kot_testing::Op;

use super::*;

#[tokio::test]
async fn grows_the_collection_one_item_per_pass() {
    let env = Env::new();
    let parent = env.create_parent("parent", None);

    env.reconcile("parent").await.unwrap();
    assert_eq!(env.children(&env.secrets, &parent).await.len(), 1);

    env.reconcile("parent").await.unwrap();
    assert_eq!(env.children(&env.secrets, &parent).await.len(), 2);

    env.secrets.reset_calls();
    env.reconcile("parent").await.unwrap();
    assert_eq!(env.secrets.writes(), 0);
}

#[tokio::test]
async fn generated_items_are_named_after_the_parent_and_owned_by_it() {
    let env = Env::new();
    let parent = env.create_parent("parent", None);
    env.settle("parent").await;

    let secrets = env.children(&env.secrets, &parent).await;
    assert_eq!(secrets.len(), 2);
    for secret in &secrets {
        assert!(secret.metadata.name.as_deref().unwrap_or_default().starts_with("parent-"));
        let owner = kot::object::controller_ref(secret).expect("controller reference");
        assert_eq!(owner.uid, parent.metadata.uid.clone().unwrap());
        assert_eq!(owner.kind, "SimpleCrd");
    }
}

#[tokio::test]
async fn removed_items_are_replaced() {
    let env = Env::new();
    let parent = env.create_parent("parent", None);
    env.settle("parent").await;

    let gone = env.children(&env.secrets, &parent).await.remove(0);
    env.secrets.delete(&gone).await.unwrap();
    env.secrets.reset_calls();

    env.reconcile("parent").await.unwrap();

    assert_eq!(env.secrets.calls(Op::Create), 1);
    assert_eq!(env.secrets.calls(Op::Delete), 0);
    assert_eq!(env.children(&env.secrets, &parent).await.len(), 2);
}

#[tokio::test]
async fn secrets_of_other_parents_are_ignored() {
    let env = Env::new();
    let first = env.create_parent("first", None);
    let second = env.create_parent("second", None);
    env.settle("first").await;
    env.settle("second").await;

    assert_eq!(env.children(&env.secrets, &first).await.len(), 2);
    assert_eq!(env.children(&env.secrets, &second).await.len(), 2);
    assert_eq!(env.secrets.len(), 4);
}

#[tokio::test]
async fn write_failures_surface_and_are_retried_next_pass() {
    let env = Env::new();
    let parent = env.create_parent("parent", None);
    env.secrets.fail_next(
        Op::Create,
        kot::StoreError::Unsupported("quota exceeded".to_string()),
    );

    let err = env.reconcile("parent").await.unwrap_err();
    assert!(err.to_string().contains("failed to create Secret"));
    assert!(env.children(&env.secrets, &parent).await.is_empty());

    env.reconcile("parent").await.unwrap();
    assert_eq!(env.children(&env.secrets, &parent).await.len(), 1);
}
