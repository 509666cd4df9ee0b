/// Unit of work tests
///
/// Staging, commit, queries, change notifications and disposal against the
/// in-memory store.
/// Run with: cargo test --test unit_of_work_tests
mod common;

use common::{Blog, Post, Recorder, blog, post, seed_blog};
use rustuow::prelude::*;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_commit_assigns_keys_and_query_reads_back() {
    let store = common::store();
    let factory = common::factory(&store).await;

    let mut uow = factory.create().await.unwrap();
    let first = uow.add(&blog("https://a", 3)).unwrap();
    let second = uow.add(&blog("https://b", 5)).unwrap();
    let third = uow.add(&blog("https://c", 4)).unwrap();

    let summary = uow.commit().await.unwrap();
    assert_eq!(summary.rows_affected, 3);
    assert_eq!(summary.changed_types, vec!["Blog"]);
    assert_eq!(summary.key_of(first), Some(1));
    assert_eq!(summary.key_of(second), Some(2));
    assert_eq!(summary.key_of(third), Some(3));
    assert!(!uow.has_changes());

    let mut reader = factory.create().await.unwrap();
    let top = reader
        .query_where::<Blog>(|b| b.rating >= 4)
        .unwrap()
        .order_by_desc(|b| b.rating)
        .load(&mut reader)
        .await
        .unwrap();
    let urls: Vec<&str> = top.iter().map(|b| b.url.as_str()).collect();
    assert_eq!(urls, vec!["https://b", "https://c"]);
    assert_eq!(reader.entry_state::<Blog>(2), Some(EntryState::Unchanged));

    let count = reader.query::<Blog>().unwrap().count(&mut reader).await.unwrap();
    assert_eq!(count, 3);

    let lowest = reader
        .get_queryable::<Blog>()
        .unwrap()
        .order_by(|b| b.rating)
        .no_tracking()
        .first(&mut reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lowest.url, "https://a");
}

#[tokio::test]
async fn test_skip_and_take_page_results() {
    let store = common::store();
    for id in 1..=6 {
        seed_blog(&store, id, &format!("https://{}", id), id);
    }
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let page = uow
        .query::<Blog>()
        .unwrap()
        .order_by(|b| b.id)
        .skip(2)
        .take(3)
        .no_tracking()
        .load(&mut uow)
        .await
        .unwrap();
    let ids: Vec<i64> = page.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    assert_eq!(uow.entry_state::<Blog>(3), None);
}

#[tokio::test]
async fn test_update_and_remove_loaded_entities() {
    let store = common::store();
    seed_blog(&store, 10, "https://old", 1);
    seed_blog(&store, 11, "https://gone", 2);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let blogs = uow.query::<Blog>().unwrap().load(&mut uow).await.unwrap();
    let mut keep = blogs[0].clone();
    keep.url = "https://new".into();
    uow.update(&keep).unwrap();
    uow.remove(&blogs[1]).unwrap();
    assert_eq!(uow.entry_state::<Blog>(10), Some(EntryState::Modified));
    assert_eq!(uow.entry_state::<Blog>(11), Some(EntryState::Deleted));

    uow.commit().await.unwrap();
    assert_eq!(common::urls(&store), vec!["https://new"]);
    assert_eq!(uow.entry_state::<Blog>(11), None);
}

#[tokio::test]
async fn test_typed_predicate_query() {
    let store = common::store();
    seed_blog(&store, 10, "https://low", 1);
    seed_blog(&store, 11, "https://high", 5);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let minimum = 3;
    let high = uow
        .query_where::<Blog>(move |b| b.rating >= minimum)
        .unwrap()
        .load(&mut uow)
        .await
        .unwrap();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].url, "https://high");

    let missing = uow
        .query_where::<Post>(|p| p.blog_id == 10)
        .unwrap()
        .count(&mut uow)
        .await
        .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn test_generated_key_written_back() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let mut fresh = blog("https://fresh", 2);
    let handle = uow.add(&fresh).unwrap();
    let summary = uow.commit().await.unwrap();

    assert!(summary.assign_key(handle, &mut fresh));
    assert_eq!(fresh.id, 1);

    // the keyed entity can now be edited in place
    fresh.url = "https://edited".into();
    uow.update(&fresh).unwrap();
    uow.commit().await.unwrap();
    assert_eq!(common::urls(&store), vec!["https://edited"]);

    // staged after that commit, so it got no key from it
    let mut other = blog("https://other", 1);
    let pending = uow.add(&other).unwrap();
    assert!(!summary.assign_key(pending, &mut other));
    assert_eq!(other.id, 0);
}

#[tokio::test]
async fn test_attached_entity_is_tracked_without_a_query() {
    let store = common::store();
    seed_blog(&store, 10, "https://known", 1);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let known = Blog { id: 10, url: "https://known".into(), rating: 1 };
    uow.attach(&known).unwrap();
    assert_eq!(uow.entry_state::<Blog>(10), Some(EntryState::Unchanged));
    assert!(!uow.has_changes());

    let renamed = Blog { url: "https://renamed".into(), ..known };
    uow.update(&renamed).unwrap();
    assert_eq!(uow.entry_state::<Blog>(10), Some(EntryState::Modified));
    assert_eq!(uow.tracked::<Blog>(10).unwrap().unwrap().url, "https://renamed");

    uow.commit().await.unwrap();
    assert_eq!(common::urls(&store), vec!["https://renamed"]);
}

#[tokio::test]
async fn test_update_without_key_is_an_insert() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.update(&blog("https://fresh", 1)).unwrap();
    uow.commit().await.unwrap();

    assert_eq!(store.row_count("Blogs").unwrap(), 1);
}

#[tokio::test]
async fn test_remove_of_unsaved_entity_only_detaches() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let draft = blog("https://draft", 1);
    uow.add(&draft).unwrap();
    assert!(uow.has_changes());

    // an unsaved entity has no key to delete by
    assert!(matches!(uow.remove(&draft), Err(DbError::Mapping(_))));

    uow.clear_change_tracker();
    assert!(!uow.has_changes());
    let summary = uow.commit().await.unwrap();
    assert!(summary.is_empty());
    assert_eq!(store.stats().opened, 1, "empty commit must not open a connection");
}

#[tokio::test]
async fn test_inserts_are_batched() {
    let store = common::store();
    let recorder = Recorder::default();
    let factory = common::builder(&store, PersistenceConfig::new("tests").insert_batch_size(2))
        .interceptor(recorder.clone())
        .build()
        .await
        .unwrap();
    let mut uow = factory.create().await.unwrap();

    for n in 0..5 {
        uow.add(&blog(&format!("https://{}", n), n)).unwrap();
    }
    let summary = uow.commit().await.unwrap();

    let inserts = recorder
        .texts()
        .into_iter()
        .filter(|t| t.contains("INSERT INTO [Blogs]"))
        .count();
    assert_eq!(inserts, 3);
    assert_eq!(summary.generated_keys.len(), 5);
    assert_eq!(store.row_count("Blogs").unwrap(), 5);
}

#[tokio::test]
async fn test_commit_failure_reverts_change_set() {
    let store = common::store();
    seed_blog(&store, 10, "https://original", 1);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let mut loaded = uow
        .query::<Blog>()
        .unwrap()
        .first(&mut uow)
        .await
        .unwrap()
        .unwrap();
    loaded.url = "https://edited".into();
    uow.update(&loaded).unwrap();
    uow.add(&blog("https://added", 2)).unwrap();
    uow.add(&post(10, "first")).unwrap();

    store.fail_writes_to("Posts").unwrap();
    let err = uow.commit().await.unwrap_err();

    assert!(matches!(err, DbError::CommitFailed { .. }));
    assert!(err.to_string().starts_with("persistence commit failed"));
    assert!(matches!(err.root_cause(), DbError::ExecutionError(_)));

    // nothing from the failed flush reached the store
    assert_eq!(common::urls(&store), vec!["https://original"]);
    assert_eq!(store.row_count("Posts").unwrap(), 0);

    // the change set is back to what the store holds
    assert!(!uow.has_changes());
    let reverted = uow.tracked::<Blog>(10).unwrap().unwrap();
    assert_eq!(reverted.url, "https://original");
    assert_eq!(store.stats().open_connections(), 0);

    // the instance stays usable
    store.clear_failures().unwrap();
    uow.add(&post(10, "second")).unwrap();
    uow.commit().await.unwrap();
    assert_eq!(store.row_count("Posts").unwrap(), 1);
}

#[tokio::test]
async fn test_observers_notified_in_registration_order() {
    let store = common::store();
    seed_blog(&store, 100, "https://seeded", 1);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&seen);
    let second = Arc::clone(&seen);
    let factory = common::builder(&store, PersistenceConfig::new("tests"))
        .observer(move |n: &ChangeNotification| {
            first.lock().unwrap().push(format!("first:{}", n.changed_types.join(",")))
        })
        .observer(move |n: &ChangeNotification| {
            second.lock().unwrap().push(format!("second:{}", n.changed_types.join(",")))
        })
        .build()
        .await
        .unwrap();
    let mut uow = factory.create().await.unwrap();

    uow.add(&blog("https://a", 1)).unwrap();
    uow.add(&post(100, "hello")).unwrap();
    uow.add(&blog("https://b", 2)).unwrap();
    uow.commit().await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["first:Blog,Post".to_string(), "second:Blog,Post".to_string()]
    );

    uow.add(&blog("https://quiet", 1)).unwrap();
    uow.commit_with(CommitOptions { notify: false }).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_channel_observer_receives_unit_id() {
    let store = common::store();
    let (observer, mut rx) = ChannelObserver::new();
    let factory = common::builder(&store, PersistenceConfig::new("tests"))
        .observer(observer)
        .build()
        .await
        .unwrap();
    let mut uow = factory.create().await.unwrap();

    uow.add(&blog("https://a", 1)).unwrap();
    uow.commit().await.unwrap();

    let notification = rx.recv().await.unwrap();
    assert_eq!(notification.unit, uow.id());
    assert!(notification.contains("Blog"));
}

#[tokio::test]
async fn test_notifications_can_be_disabled_in_config() {
    let store = common::store();
    let (observer, mut rx) = ChannelObserver::new();
    let factory = common::builder(&store, PersistenceConfig::new("tests").notify_on_commit(false))
        .observer(observer)
        .build()
        .await
        .unwrap();
    let mut uow = factory.create().await.unwrap();

    uow.add(&blog("https://a", 1)).unwrap();
    uow.commit().await.unwrap();

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dispose_releases_connection_once() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let before = store.stats();

    let mut uow = factory.create().await.unwrap();
    uow.begin_transaction().await.unwrap();
    uow.add(&blog("https://a", 1)).unwrap();
    uow.commit().await.unwrap();

    uow.dispose().await;
    uow.dispose().await;
    drop(uow);

    let after = store.stats();
    assert_eq!(after.opened - before.opened, 1);
    assert_eq!(after.closed - before.closed, 1);
    assert_eq!(after.open_connections(), 0);
    // the open transaction was rolled back
    assert_eq!(store.row_count("Blogs").unwrap(), 0);
}

#[tokio::test]
async fn test_disposed_unit_rejects_operations() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();
    uow.dispose().await;

    assert!(uow.is_disposed());
    assert!(matches!(uow.add(&blog("https://a", 1)), Err(DbError::Disposed)));
    assert!(matches!(uow.query::<Blog>(), Err(DbError::Disposed)));
    let err = uow.begin_transaction().await.unwrap_err();
    assert!(err.is_state_misuse());
}

#[tokio::test]
async fn test_drop_abandons_open_transaction() {
    let store = common::store();
    let factory = common::factory(&store).await;

    {
        let mut uow = factory.create().await.unwrap();
        uow.begin_transaction().await.unwrap();
        uow.add(&blog("https://a", 1)).unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.row_count("Blogs").unwrap(), 1);
    }

    assert_eq!(store.row_count("Blogs").unwrap(), 0);
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_unmapped_entity_is_rejected() {
    #[derive(Debug, Clone)]
    struct Comment {
        id: i64,
        body: String,
    }
    impl_entity!(Comment, table = "Comments", key = id, columns { body });

    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let comment = Comment { id: 0, body: "hi".into() };
    assert!(matches!(uow.add(&comment), Err(DbError::EntityNotMapped(_))));
    assert!(matches!(uow.query::<Comment>(), Err(DbError::EntityNotMapped(_))));
    assert!(!uow.has_changes());
}

#[tokio::test]
async fn test_units_are_isolated_change_sets() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut left = factory.create().await.unwrap();
    let mut right = factory.create().await.unwrap();
    assert_ne!(left.id(), right.id());

    left.add(&blog("https://left", 1)).unwrap();
    assert!(!right.has_changes());

    let summary = right.commit().await.unwrap();
    assert!(summary.is_empty());
    assert_eq!(store.row_count("Blogs").unwrap(), 0);

    left.commit().await.unwrap();
    let seen = right.query::<Blog>().unwrap().count(&mut right).await.unwrap();
    assert_eq!(seen, 1);
}

#[tokio::test]
async fn test_posts_reference_committed_blog() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let handle = uow.add(&blog("https://a", 1)).unwrap();
    let blog_id = uow.commit().await.unwrap().key_of(handle).unwrap();

    uow.add(&post(blog_id, "hello")).unwrap();
    uow.commit().await.unwrap();

    let posts = uow.query::<Post>().unwrap().load(&mut uow).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].blog_id, blog_id);
}
