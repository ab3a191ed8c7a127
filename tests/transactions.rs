mod common;

use common::TestDb;
use namebucket::services::{ServiceError, ServiceResult};
use sqlx::{Connection, SqliteConnection, sqlite::SqliteConnectOptions};
use std::time::Duration;

async fn adjective_count(test_db: &TestDb) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM adjectives")
        .fetch_one(test_db.db.reader())
        .await
        .unwrap()
}

#[tokio::test]
async fn commits_on_success() {
    let test_db = TestDb::new().await;

    let id = test_db
        .db
        .write_tx("insert_adjective", |conn| {
            Box::pin(async move {
                let id: i64 =
                    sqlx::query_scalar("INSERT INTO adjectives (value) VALUES ('ok') RETURNING id")
                        .fetch_one(&mut *conn)
                        .await?;
                Ok(id)
            })
        })
        .await
        .unwrap();

    assert!(id > 0);
    assert_eq!(adjective_count(&test_db).await, 1);
}

#[tokio::test]
async fn domain_error_rolls_back_and_passes_through() {
    let test_db = TestDb::new().await;

    let result: ServiceResult<()> = test_db
        .db
        .write_tx("insert_then_fail", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO adjectives (value) VALUES ('ok')")
                    .execute(&mut *conn)
                    .await?;
                Err(ServiceError::BucketExhausted("b1".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(ServiceError::BucketExhausted(_))));
    assert_eq!(adjective_count(&test_db).await, 0);
}

#[tokio::test]
async fn storage_error_is_wrapped_with_rollback_outcome() {
    let test_db = TestDb::new().await;

    let result: ServiceResult<()> = test_db
        .db
        .write_tx("broken_statement", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO adjectives (value) VALUES ('ok')")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("INSERT INTO missing_table (value) VALUES (1)")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await;

    match result {
        Err(ServiceError::TransactionFailure {
            operation,
            cause,
            rollback,
        }) => {
            assert_eq!(operation, "broken_statement");
            assert!(matches!(*cause, ServiceError::Sqlx(_)), "{cause:?}");
            assert!(rollback.is_none());
        }
        other => panic!("expected a transaction failure, got {other:?}"),
    }
    assert_eq!(adjective_count(&test_db).await, 0);
}

#[tokio::test]
async fn read_transactions_cannot_write() {
    let test_db = TestDb::new().await;

    let result: ServiceResult<()> = test_db
        .db
        .read_tx("sneaky_write", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO adjectives (value) VALUES ('ok')")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await;

    assert!(
        matches!(result, Err(ServiceError::TransactionFailure { .. })),
        "{result:?}"
    );
    assert_eq!(adjective_count(&test_db).await, 0);
}

#[tokio::test]
async fn deadline_rolls_back_and_frees_the_writer() {
    let test_db = TestDb::with_timeout(Duration::from_millis(200)).await;

    let result: ServiceResult<()> = test_db
        .db
        .write_tx("slow_insert", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO adjectives (value) VALUES ('slow')")
                    .execute(&mut *conn)
                    .await?;
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            })
        })
        .await;

    assert!(
        matches!(result, Err(ServiceError::DeadlineExceeded("slow_insert"))),
        "{result:?}"
    );

    // The abandoned transaction is rolled back before the connection is reused.
    test_db
        .db
        .write_tx("fast_insert", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO adjectives (value) VALUES ('fast')")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await
        .unwrap();

    let values: Vec<String> = sqlx::query_scalar("SELECT value FROM adjectives")
        .fetch_all(test_db.db.reader())
        .await
        .unwrap();
    assert_eq!(values, vec!["fast"]);
}

#[tokio::test]
async fn foreign_writer_lock_surfaces_as_busy() {
    let test_db = TestDb::new().await;

    let mut intruder =
        SqliteConnection::connect_with(&SqliteConnectOptions::new().filename(test_db.path()))
            .await
            .unwrap();
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut intruder)
        .await
        .unwrap();

    let result: ServiceResult<()> = test_db
        .db
        .write_tx("contended_insert", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO adjectives (value) VALUES ('late')")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(ServiceError::Busy(_))), "{result:?}");

    sqlx::query("ROLLBACK")
        .execute(&mut intruder)
        .await
        .unwrap();
    intruder.close().await.unwrap();
}

#[tokio::test]
async fn migrations_are_idempotent_and_pools_answer() {
    let test_db = TestDb::new().await;

    test_db.db.run_migrations().await.unwrap();
    test_db.db.ping().await.unwrap();
    assert!(test_db.db.database_size_bytes().await.unwrap() > 0);
}
