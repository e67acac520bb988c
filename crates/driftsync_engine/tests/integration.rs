//! End-to-end scenarios: fetch-merge, edit, and dependency-ordered
//! commit against the in-memory adapter.

use std::sync::Arc;

use driftsync_engine::{
    AdapterCall, AdapterError, CommitError, MemoryAdapter, MergeEngine, OperationGraph,
};
use driftsync_model::{
    ChangeBatch, Entity, EntityStore, RelationshipDescriptor, SchemaRegistry, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn blog_schema() -> Arc<SchemaRegistry> {
    let mut schema = SchemaRegistry::new();
    schema.register(
        "post",
        vec![
            RelationshipDescriptor::to_many("comments", true),
            RelationshipDescriptor::to_one("author", false),
        ],
    );
    schema.register("comment", vec![RelationshipDescriptor::to_one("post", true)]);
    Arc::new(schema)
}

#[tokio::test]
async fn new_post_and_comment_commit_in_dependency_order() {
    init_tracing();
    let mut store = EntityStore::new(blog_schema());
    let adapter = Arc::new(MemoryAdapter::new());

    let post = store.track(Entity::new("post"));
    store
        .get_mut(&post)
        .unwrap()
        .set_attribute("title", Value::text("Hello"));
    let comment = store.track(Entity::new("comment"));
    store
        .get_mut(&comment)
        .unwrap()
        .set_attribute("body", Value::text("First!"));

    let mut batch = ChangeBatch::new();
    store.set_reference(&comment, "post", Some(post.clone()), &mut batch);
    store.set_collection(&post, "comments", vec![comment.clone()], None, &mut batch);
    store.publish(batch);

    let graph = OperationGraph::build(adapter.clone(), &store, &[comment.clone()]);
    assert_eq!(graph.len(), 2);
    let result = graph.execute(&mut store).await;

    assert!(result.is_success());
    assert_eq!(
        adapter.calls(),
        vec![
            AdapterCall::Create(post.clone()),
            AdapterCall::Create(comment.clone()),
        ]
    );

    // the post was created first and its identifier propagated into the
    // comment's payload
    assert_eq!(store.get(&post).unwrap().id(), Some("1"));
    let confirmed_comment = result.confirmed(&comment).unwrap();
    assert_eq!(confirmed_comment.id(), Some("2"));
    assert_eq!(
        confirmed_comment.attribute("post_id"),
        Some(&Value::text("1"))
    );
    assert_eq!(store.get(&comment).unwrap().id(), Some("2"));
    assert_eq!(store.lookup("post", "1"), Some(&post));
    assert_eq!(store.lookup("comment", "2"), Some(&comment));

    // keys are stable across identifier adoption
    assert_eq!(store.get(&post).unwrap().key(), &post);

    // committed state is the new confirmation baseline
    let follow_up = OperationGraph::build(adapter.clone(), &store, &[comment]);
    let result = follow_up.execute(&mut store).await;
    assert!(result.is_success());
    assert_eq!(adapter.calls().len(), 2);
}

#[tokio::test]
async fn merging_fetched_data_emits_one_coalesced_event_per_entity() {
    init_tracing();
    let schema = blog_schema();
    let mut local = EntityStore::new(Arc::clone(&schema));
    let held = local.load({
        let mut post = Entity::persistent("post", "1");
        post.set_attribute("title", Value::text("Old title"));
        post.set_attribute("views", Value::Integer(10));
        post
    });
    let receiver = local.subscribe();

    let mut incoming = EntityStore::new(Arc::clone(&schema));
    let fetched_comment = incoming.load({
        let mut comment = Entity::persistent("comment", "2");
        comment.set_attribute("body", Value::text("Nice"));
        comment
    });
    let fetched_post = incoming.load({
        let mut post = Entity::persistent("post", "1");
        post.set_attribute("title", Value::text("New title"));
        post.set_attribute("views", Value::Integer(10));
        post.set_pending_contents("comments", vec![fetched_comment]);
        post
    });

    let merged = MergeEngine::new().merge(&incoming, &fetched_post, &mut local);
    assert_eq!(merged, held);

    // server values win
    let post = local.get(&held).unwrap();
    assert_eq!(post.attribute("title"), Some(&Value::text("New title")));
    assert_eq!(post.to_many_members("comments").len(), 1);

    // exactly one coalesced event for the post, one for the new comment
    let events = vec![receiver.try_recv().unwrap(), receiver.try_recv().unwrap()];
    assert!(receiver.try_recv().is_err());
    let post_event = events
        .iter()
        .find(|event| event.key == held)
        .expect("post event");
    assert_eq!(post_event.attributes, vec!["title"]);
    assert_eq!(post_event.relationships, vec!["comments"]);

    // merging the same data again is a no-op
    let receiver = local.subscribe();
    MergeEngine::new().merge(&incoming, &fetched_post, &mut local);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn merged_entities_commit_their_local_edits() {
    init_tracing();
    let schema = blog_schema();
    let mut local = EntityStore::new(Arc::clone(&schema));
    let adapter = Arc::new(MemoryAdapter::new());

    let mut incoming = EntityStore::new(Arc::clone(&schema));
    let fetched = incoming.load({
        let mut post = Entity::persistent("post", "1");
        post.set_attribute("title", Value::text("Fetched"));
        post
    });
    let post = MergeEngine::new().merge(&incoming, &fetched, &mut local);

    // clean straight after a merge, dirty after a local edit
    let graph = OperationGraph::build(adapter.clone(), &local, &[post.clone()]);
    let result = graph.execute(&mut local).await;
    assert!(result.is_success());
    assert!(adapter.calls().is_empty());

    local
        .get_mut(&post)
        .unwrap()
        .set_attribute("title", Value::text("Edited"));
    let graph = OperationGraph::build(adapter.clone(), &local, &[post.clone()]);
    let result = graph.execute(&mut local).await;
    assert!(result.is_success());
    assert_eq!(adapter.calls(), vec![AdapterCall::Update(post.clone())]);
    assert_eq!(
        local.shadow(&post).unwrap().attribute("title"),
        Some(&Value::text("Edited"))
    );
}

#[tokio::test]
async fn dependency_failure_spares_independent_branches() {
    init_tracing();
    let mut store = EntityStore::new(blog_schema());
    let adapter = Arc::new(MemoryAdapter::new());

    let post = store.track(Entity::new("post"));
    let comment = store.track(Entity::new("comment"));
    let unrelated = store.track(Entity::new("post"));

    let mut batch = ChangeBatch::new();
    store.set_reference(&comment, "post", Some(post.clone()), &mut batch);
    store.set_collection(&post, "comments", vec![comment.clone()], None, &mut batch);

    adapter.fail_with(
        post.clone(),
        AdapterError::new("title is required").with_detail(Value::text("title")),
    );

    let graph = OperationGraph::build(
        adapter.clone(),
        &store,
        &[comment.clone(), unrelated.clone()],
    );
    let result = graph.execute(&mut store).await;
    assert!(!result.is_success());

    // the comment's remote call was never issued
    assert!(!adapter.calls().contains(&AdapterCall::Create(comment.clone())));
    let error = result.outcome(&comment).unwrap().as_ref().unwrap_err();
    assert!(error.is_dependency_failure());
    assert_eq!(
        error,
        &CommitError::DependencyFailure { failed: post.clone() }
    );

    // the failed root is visible with its error detail
    let post_error = result.outcome(&post).unwrap().as_ref().unwrap_err();
    assert_eq!(post_error.detail(), Some(&Value::text("title")));

    // the independent branch ran to completion
    assert!(result.confirmed(&unrelated).is_some());
    assert!(store.get(&unrelated).unwrap().id().is_some());

    // nothing was confirmed for the failed branch
    assert!(store.get(&post).unwrap().is_new());
    assert!(store.get(&comment).unwrap().is_new());
}

#[tokio::test]
async fn failed_update_reports_the_last_confirmed_state() {
    init_tracing();
    let mut store = EntityStore::new(blog_schema());
    let adapter = Arc::new(MemoryAdapter::new());

    let mut entity = Entity::persistent("post", "1");
    entity.set_attribute("title", Value::text("Confirmed"));
    let key = store.load(entity);
    store
        .get_mut(&key)
        .unwrap()
        .set_attribute("title", Value::text("Rejected edit"));

    adapter.fail_with(
        key.clone(),
        AdapterError::new("title is taken").with_detail(Value::text("title")),
    );

    let graph = OperationGraph::build(adapter.clone(), &store, &[key.clone()]);
    let result = graph.execute(&mut store).await;

    let error = result.outcome(&key).unwrap().as_ref().unwrap_err();
    let reported = error.reported_entity().expect("shadow state");
    assert_eq!(reported.attribute("title"), Some(&Value::text("Confirmed")));

    // the local edit is still in place for a retry
    assert_eq!(
        store.get(&key).unwrap().attribute("title"),
        Some(&Value::text("Rejected edit"))
    );
    let retry = OperationGraph::build(adapter.clone(), &store, &[key.clone()]);
    let result = retry.execute(&mut store).await;
    assert!(result.is_success());
    assert_eq!(
        store.shadow(&key).unwrap().attribute("title"),
        Some(&Value::text("Rejected edit"))
    );
}

#[tokio::test]
async fn delete_commits_remove_the_entity() {
    init_tracing();
    let mut store = EntityStore::new(blog_schema());
    let adapter = Arc::new(MemoryAdapter::new());

    let key = store.load(Entity::persistent("post", "1"));
    store.get_mut(&key).unwrap().mark_deleted();

    let graph = OperationGraph::build(adapter.clone(), &store, &[key.clone()]);
    let result = graph.execute(&mut store).await;

    assert!(result.is_success());
    assert_eq!(adapter.calls(), vec![AdapterCall::Delete(key.clone())]);
    assert!(store.get(&key).is_none());
    assert!(store.lookup("post", "1").is_none());
}

#[tokio::test]
async fn pending_edits_survive_a_merge_and_commit() {
    init_tracing();
    let schema = blog_schema();
    let mut local = EntityStore::new(Arc::clone(&schema));
    let adapter = Arc::new(MemoryAdapter::new());

    let post = local.load({
        let mut post = Entity::persistent("post", "1");
        post.set_attribute("title", Value::text("A"));
        post
    });
    local
        .get_mut(&post)
        .unwrap()
        .set_attribute("draft", Value::text("x"));

    // a fetch lands while the edit is still uncommitted
    let mut incoming = EntityStore::new(Arc::clone(&schema));
    let fetched = incoming.load({
        let mut post = Entity::persistent("post", "1");
        post.set_attribute("title", Value::text("B"));
        post
    });
    let merged = MergeEngine::new().merge(&incoming, &fetched, &mut local);
    assert_eq!(merged, post);
    assert_eq!(
        local.get(&post).unwrap().attribute("title"),
        Some(&Value::text("B"))
    );
    assert_eq!(
        local.get(&post).unwrap().attribute("draft"),
        Some(&Value::text("x"))
    );

    // the edit is still dirty after the merge and commits as an update
    let graph = OperationGraph::build(adapter.clone(), &local, &[post.clone()]);
    let result = graph.execute(&mut local).await;
    assert!(result.is_success());
    assert_eq!(adapter.calls(), vec![AdapterCall::Update(post.clone())]);
    assert_eq!(
        result.confirmed(&post).unwrap().attribute("draft"),
        Some(&Value::text("x"))
    );
    assert_eq!(
        local.shadow(&post).unwrap().attribute("draft"),
        Some(&Value::text("x"))
    );
}
