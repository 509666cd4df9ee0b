/// Stored procedure tests
///
/// Result mapping by column name, failure modes and cancellation.
/// Run with: cargo test --test stored_procedure_tests
mod common;

use rustuow::connection::ProcedureFailureMode;
use rustuow::prelude::*;
use std::time::Duration;

#[derive(Debug, Default, PartialEq)]
struct PersonRow {
    id: i64,
    full_name: String,
    nickname: Option<String>,
}

impl_from_record!(PersonRow { id, full_name, nickname });

fn register_people(store: &MemoryStore) {
    store
        .register_procedure("GetPeople", |ctx| {
            let min_id = ctx
                .parameter("@MinId")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let rows = [(1, "Ada Lovelace"), (2, "Alan Turing"), (3, "Grace Hopper")]
                .into_iter()
                .filter(|(id, _)| *id >= min_id)
                .map(|(id, name)| {
                    vec![
                        Value::Integer(id),
                        Value::Text(name.into()),
                        Value::Text("ignored".into()),
                    ]
                })
                .collect();
            Ok(QueryResult::new(
                vec!["id".into(), "full_name".into(), "extra_unused_col".into()],
                rows,
            ))
        })
        .unwrap();
}

#[tokio::test]
async fn test_procedure_rows_map_by_column_name() {
    let store = common::store();
    register_people(&store);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let people: Vec<PersonRow> = uow
        .execute_stored_procedure("GetPeople", &[("@MinId", Value::Integer(2))])
        .await
        .unwrap();

    assert_eq!(
        people,
        vec![
            PersonRow { id: 2, full_name: "Alan Turing".into(), nickname: None },
            PersonRow { id: 3, full_name: "Grace Hopper".into(), nickname: None },
        ]
    );
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_procedure_reads_tables() {
    let store = common::store();
    common::seed_blog(&store, 1, "https://a", 4);
    store
        .register_procedure("GetBlogs", |ctx| ctx.scan("Blogs"))
        .unwrap();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    #[derive(Debug, Default)]
    struct BlogRow {
        url: String,
        rating: i64,
    }
    impl_from_record!(BlogRow { url, rating });

    let rows: Vec<BlogRow> = uow.execute_stored_procedure("GetBlogs", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "https://a");
    assert_eq!(rows[0].rating, 4);
}

#[tokio::test]
async fn test_procedure_joins_open_transaction() {
    let store = common::store();
    store
        .register_procedure("CountBlogs", |ctx| {
            let count = ctx.table("Blogs")?.row_count() as i64;
            Ok(QueryResult::new(vec!["id".into()], vec![vec![Value::Integer(count)]]))
        })
        .unwrap();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    uow.begin_transaction().await.unwrap();
    uow.add(&common::blog("https://uncommitted", 1)).unwrap();
    uow.commit().await.unwrap();

    let counted: Vec<PersonRow> = uow.execute_stored_procedure("CountBlogs", &[]).await.unwrap();
    assert_eq!(counted[0].id, 1);
    assert!(uow.is_in_transaction());

    uow.rollback_transaction().await.unwrap();
    assert_eq!(store.row_count("Blogs").unwrap(), 0);
}

#[tokio::test]
async fn test_procedure_failure_propagates_by_default() {
    let store = common::store();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let err = uow
        .execute_stored_procedure::<PersonRow>("Missing", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ProcedureNotFound(_)));
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_procedure_failure_can_return_empty() {
    let store = common::store();
    store
        .register_procedure("Broken", |_| Err(DbError::ExecutionError("deadlock".into())))
        .unwrap();
    let config = PersistenceConfig::new("tests")
        .procedure_failure_mode(ProcedureFailureMode::LogAndReturnEmpty);
    let factory = common::factory_with(&store, config).await;
    let mut uow = factory.create().await.unwrap();

    let rows: Vec<PersonRow> = uow.execute_stored_procedure("Broken", &[]).await.unwrap();
    assert!(rows.is_empty());
    let rows: Vec<PersonRow> = uow.execute_stored_procedure("Missing", &[]).await.unwrap();
    assert!(rows.is_empty());

    // misuse is still reported
    uow.dispose().await;
    let err = uow
        .execute_stored_procedure::<PersonRow>("Broken", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Disposed));
}

#[tokio::test]
async fn test_mapping_failure_is_reported() {
    let store = common::store();
    store
        .register_procedure("BadIds", |_| {
            Ok(QueryResult::new(vec!["id".into()], vec![vec![Value::Text("x".into())]]))
        })
        .unwrap();
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let err = uow
        .execute_stored_procedure::<PersonRow>("BadIds", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::TypeMismatch(_)));
}

#[tokio::test]
async fn test_procedure_cancellation_releases_connection() {
    let store = common::populate(MemoryStore::new().with_latency(Duration::from_millis(200)));
    register_people(&store);
    let factory = common::factory(&store).await;
    let mut uow = factory.create().await.unwrap();

    let err = uow
        .execute_stored_procedure_until::<PersonRow, _>(
            "GetPeople",
            &[],
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Cancelled(_)));
    assert!(err.is_recoverable());
    assert_eq!(store.stats().open_connections(), 0);
}

#[tokio::test]
async fn test_procedure_timeout_is_cancellation() {
    let store = common::populate(MemoryStore::new().with_latency(Duration::from_millis(200)));
    register_people(&store);
    let config = PersistenceConfig::new("tests")
        .command_timeout(Duration::from_millis(20))
        .procedure_failure_mode(ProcedureFailureMode::LogAndReturnEmpty);
    let factory = common::factory_with(&store, config).await;
    let mut uow = factory.create().await.unwrap();

    let err = uow
        .execute_stored_procedure::<PersonRow>("GetPeople", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Cancelled(_)));
    assert_eq!(store.stats().open_connections(), 0);
}
