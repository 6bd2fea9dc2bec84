//! Integration tests for batched row streaming.

use futures_util::StreamExt;
use std::time::Duration;
use steady_db::{DbClient, DbConfig, DbError, Statement};
use tempfile::NamedTempFile;

fn temp_db_path() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn client_with_rows(rows: i64) -> DbClient {
    let client = DbClient::new(DbConfig::sqlite(temp_db_path()));
    client.connect().await.unwrap();
    client
        .execute_write(&Statement::new("CREATE TABLE nums (n INTEGER PRIMARY KEY)"))
        .await
        .unwrap();
    if rows > 0 {
        let sets: Vec<_> = (1..=rows).map(|n| vec![n.into()]).collect();
        client
            .execute_batch(&Statement::new("INSERT INTO nums (n) VALUES (?)"), &sets)
            .await
            .unwrap();
    }
    client
}

#[tokio::test]
async fn test_default_batch_size_over_250_rows() {
    let client = client_with_rows(250).await;
    let mut stream = client.stream(Statement::new("SELECT n FROM nums ORDER BY n"));

    let mut sizes = Vec::new();
    let mut seen = Vec::new();
    while let Some(batch) = stream.next_batch().await {
        let batch = batch.unwrap();
        sizes.push(batch.len());
        for row in &batch {
            seen.push(row.get_i64("n").unwrap());
        }
    }

    // 250 rows in order, no duplicates, in default batches of 100.
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(seen, (1..=250).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_custom_batch_size() {
    let client = client_with_rows(250).await;
    let mut stream =
        client.stream_with_batch_size(Statement::new("SELECT n FROM nums ORDER BY n"), 64);

    let mut sizes = Vec::new();
    while let Some(batch) = stream.next_batch().await {
        sizes.push(batch.unwrap().len());
    }
    assert_eq!(sizes, vec![64, 64, 64, 58]);
}

#[tokio::test]
async fn test_stream_implements_futures_stream() {
    let client = client_with_rows(10).await;
    let stream = client.stream_with_batch_size(Statement::new("SELECT n FROM nums ORDER BY n"), 4);

    let batches: Vec<_> = stream.collect().await;
    assert_eq!(batches.len(), 3);
    let total: usize = batches.into_iter().map(|b| b.unwrap().len()).sum();
    assert_eq!(total, 10);
}

#[tokio::test]
async fn test_stream_failure_is_terminal() {
    let client = client_with_rows(0).await;
    let mut stream = client.stream(Statement::new("SELECT n FROM missing_table"));

    match stream.next_batch().await {
        Some(Err(DbError::QueryFailure { statement, .. })) => {
            assert!(statement.contains("missing_table"));
        }
        other => panic!("expected query failure, got {other:?}"),
    }
    assert!(stream.next_batch().await.is_none());
}

#[tokio::test]
async fn test_stream_after_close_reports_not_connected() {
    let client = client_with_rows(5).await;
    client.close().await.unwrap();

    let mut stream = client.stream(Statement::new("SELECT n FROM nums"));
    assert!(matches!(
        stream.next_batch().await,
        Some(Err(DbError::NotConnected))
    ));
}

#[tokio::test]
async fn test_stream_occupies_a_connection_until_drained() {
    let client = client_with_rows(300).await;
    let mut stream =
        client.stream_with_batch_size(Statement::new("SELECT n FROM nums ORDER BY n"), 50);

    // First batch proves the producer is running and holding the single
    // pooled connection.
    let first = stream.next_batch().await.unwrap().unwrap();
    assert_eq!(first.len(), 50);

    let err = client
        .execute_read(&Statement::new("SELECT 1").with_timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));

    // Draining the stream releases the connection.
    let mut total = first.len();
    while let Some(batch) = stream.next_batch().await {
        total += batch.unwrap().len();
    }
    assert_eq!(total, 300);

    let rows = client
        .execute_read(&Statement::new("SELECT count(*) AS c FROM nums"))
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64("c"), Some(300));
}

#[tokio::test]
async fn test_dropping_stream_frees_the_connection() {
    let client = client_with_rows(300).await;
    let mut stream =
        client.stream_with_batch_size(Statement::new("SELECT n FROM nums ORDER BY n"), 10);
    let _ = stream.next_batch().await.unwrap().unwrap();
    drop(stream);

    let rows = client
        .execute_read(&Statement::new("SELECT count(*) AS c FROM nums").with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(rows[0].get_i64("c"), Some(300));
}
