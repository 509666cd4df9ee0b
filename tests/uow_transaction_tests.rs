/// Transaction tests
///
/// Explicit transactions, rollback semantics and the transactional
/// execution helper.
/// Run with: cargo test --test uow_transaction_tests
mod common;

use anyhow::anyhow;
use common::{Blog, blog, seed_blog};
use rustuow::prelude::*;

#[tokio::test]
async fn test_begin_commit() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    assert!(uow.is_in_transaction());

    uow.add(&blog("https://a", 1)).unwrap();
    uow.add(&blog("https://b", 2)).unwrap();
    uow.commit_transaction().await.unwrap();

    assert!(!uow.is_in_transaction());
    assert!(!uow.has_changes());
    assert_eq!(store.row_count("Blogs").unwrap(), 2);
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_commit_transaction_does_not_notify() {
    let store = common::store();
    let (observer, mut rx) = ChannelObserver::new();
    let factory = common::builder(&store, PersistenceConfig::new("tests"))
        .observer(observer)
        .build()
        .await
        .unwrap();
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    uow.add(&blog("https://a", 1)).unwrap();
    uow.commit_transaction().await.unwrap();

    assert!(rx.try_recv().is_err());
    assert_eq!(store.row_count("Blogs").unwrap(), 1);
}

#[tokio::test]
async fn test_double_begin_is_rejected() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    uow.add(&blog("https://a", 1)).unwrap();
    uow.commit().await.unwrap();

    let err = uow.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::AlreadyInTransaction));

    // the open transaction is untouched
    assert!(uow.is_in_transaction());
    uow.commit_transaction().await.unwrap();
    assert_eq!(store.row_count("Blogs").unwrap(), 1);
}

#[tokio::test]
async fn test_commit_and_rollback_require_a_transaction() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.add(&blog("https://pending", 1)).unwrap();

    let err = uow.commit_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::NotInTransaction));
    assert!(uow.has_changes());

    let err = uow.rollback_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::NotInTransaction));
    assert!(uow.has_changes());

    assert_eq!(store.row_count("Blogs").unwrap(), 0);
    uow.commit().await.unwrap();
    assert_eq!(store.row_count("Blogs").unwrap(), 1);
}

#[tokio::test]
async fn test_rollback_reverts_everything_since_begin() {
    let store = common::store();
    seed_blog(&store, 10, "https://kept", 1);
    seed_blog(&store, 11, "https://deleted", 2);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    let blogs = uow
        .query::<Blog>()
        .unwrap()
        .order_by(|b| b.id)
        .load(&mut uow)
        .await
        .unwrap();

    let mut edited = blogs[0].clone();
    edited.url = "https://edited".into();
    uow.update(&edited).unwrap();
    uow.remove(&blogs[1]).unwrap();
    uow.add(&blog("https://added", 3)).unwrap();
    uow.commit().await.unwrap();
    // the added blog takes identity 1, ahead of the seeded keys
    assert_eq!(common::urls(&store), vec!["https://added", "https://edited"]);

    // staged after the last commit, never flushed
    uow.add(&blog("https://staged", 4)).unwrap();

    uow.rollback_transaction().await.unwrap();

    assert!(!uow.is_in_transaction());
    assert!(!uow.has_changes());
    assert_eq!(common::urls(&store), vec!["https://kept", "https://deleted"]);
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_commit_transaction_failure_rolls_back() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    uow.add(&blog("https://flushed", 1)).unwrap();
    uow.commit().await.unwrap();

    uow.add(&common::post(999, "orphan")).unwrap();
    let err = uow.commit_transaction().await.unwrap_err();

    assert!(matches!(err, DbError::CommitFailed { .. }));
    assert!(matches!(err.root_cause(), DbError::ConstraintViolation(_)));
    assert!(!uow.is_in_transaction());
    assert!(!uow.has_changes());
    assert_eq!(store.row_count("Blogs").unwrap(), 0);
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_execute_in_transaction_commits_on_success() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let url = "https://inside".to_string();
    let key = uow
        .execute_in_transaction(move |uow| {
            Box::pin(async move {
                let handle = uow.add(&blog(&url, 1))?;
                let summary = uow.commit().await?;
                Ok::<_, DbError>(summary.key_of(handle))
            })
        })
        .await
        .unwrap();

    assert_eq!(key, Some(1));
    assert!(!uow.is_in_transaction());
    assert_eq!(common::urls(&store), vec!["https://inside"]);
}

#[tokio::test]
async fn test_execute_in_transaction_is_atomic() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let result: anyhow::Result<()> = uow
        .execute_in_transaction(|uow| {
            Box::pin(async move {
                uow.add(&blog("https://a", 1))?;
                uow.commit().await?;
                uow.add(&blog("https://b", 2))?;
                uow.commit().await?;
                Err(anyhow!("payment declined"))
            })
        })
        .await;

    assert_eq!(result.unwrap_err().to_string(), "payment declined");
    assert!(!uow.is_in_transaction());
    assert_eq!(store.row_count("Blogs").unwrap(), 0);
}

#[derive(Debug)]
enum AppError {
    Store(DbError),
    Rejected(&'static str),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        AppError::Store(e)
    }
}

#[tokio::test]
async fn test_execute_in_transaction_returns_action_error_unchanged() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let result: std::result::Result<(), AppError> = uow
        .execute_in_transaction(|uow| {
            Box::pin(async move {
                uow.add(&blog("https://a", 1))?;
                uow.commit().await?;
                Err(AppError::Rejected("quota"))
            })
        })
        .await;

    assert!(matches!(result, Err(AppError::Rejected("quota"))));
    assert_eq!(store.row_count("Blogs").unwrap(), 0);

    let result: std::result::Result<(), AppError> = uow
        .execute_in_transaction(|uow| Box::pin(async move { uow.begin_transaction().await.map_err(Into::into) }))
        .await;
    assert!(matches!(
        result,
        Err(AppError::Store(DbError::AlreadyInTransaction))
    ));
    assert!(!uow.is_in_transaction());
}

#[tokio::test]
async fn test_nested_execution_joins_outer_transaction() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    uow.execute_in_transaction(|uow| {
        Box::pin(async move {
            uow.add(&blog("https://inner", 1))?;
            uow.commit().await?;
            Ok::<_, DbError>(())
        })
    })
    .await
    .unwrap();

    // the inner call neither committed nor ended the outer transaction
    assert!(uow.is_in_transaction());
    assert_eq!(store.row_count("Blogs").unwrap(), 1);

    uow.rollback_transaction().await.unwrap();
    assert_eq!(store.row_count("Blogs").unwrap(), 0);
}

#[tokio::test]
async fn test_nested_failure_leaves_outer_decision_to_caller() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    uow.add(&blog("https://outer", 1)).unwrap();
    uow.commit().await.unwrap();

    let inner: rustuow::Result<()> = uow
        .execute_in_transaction(|uow| {
            Box::pin(async move {
                uow.add(&blog("https://inner", 2))?;
                Err(DbError::Mapping("inner failed".into()))
            })
        })
        .await;

    assert!(matches!(inner, Err(DbError::Mapping(_))));
    assert!(uow.is_in_transaction());

    uow.clear_change_tracker();
    uow.commit_transaction().await.unwrap();
    assert_eq!(common::urls(&store), vec!["https://outer"]);
}
