use std::sync::Arc;
use std::thread;

use sql_queue::{SqlQueue, SqlQueueError, Value, batch, params};
use tempfile::TempDir;

fn open_queue(dir: &TempDir) -> Result<SqlQueue, SqlQueueError> {
    SqlQueue::builder(dir.path().join("basics.db"))
        .backup_on_stop(false)
        .open()
}

#[test]
fn select_without_params_returns_rows() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;

    let rs = queue.execute("SELECT 1 AS one, 'two' AS two", Vec::new())?;
    assert_eq!(rs.len(), 1);
    assert_eq!(rs.column_names(), ["one", "two"]);
    assert_eq!(rs.rows[0].get("one"), Some(&Value::Int(1)));
    assert_eq!(rs.rows[0].get("two"), Some(&Value::Text("two".into())));

    queue.stop()
}

#[test]
fn repeated_select_is_idempotent() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;
    queue.execute(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT); \
         INSERT INTO t VALUES (1, 'a'), (2, 'b');",
        Vec::new(),
    )?;

    let first = queue.execute("SELECT * FROM t ORDER BY id", Vec::new())?;
    let second = queue.execute("SELECT * FROM t ORDER BY id", Vec::new())?;
    assert_eq!(first.rows, second.rows);
    assert_eq!(first.len(), 2);

    queue.stop()
}

#[test]
fn parameterized_and_batch_writes() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;
    queue.execute("CREATE TABLE t (id INTEGER, name TEXT)", Vec::new())?;

    let rs = queue.execute("INSERT INTO t VALUES (?1, ?2)", params([Value::Int(1), "one".into()]))?;
    assert_eq!(rs.rows_affected, 1);

    let rows = vec![
        vec![Value::Int(2), Value::from("two")],
        vec![Value::Int(3), Value::from("three")],
    ];
    let rs = queue.execute("INSERT INTO t VALUES (?1, ?2)", batch(rows))?;
    assert_eq!(rs.rows_affected, 2);

    let rs = queue.execute("SELECT name FROM t WHERE id >= ?1 ORDER BY id", params([2]))?;
    let names: Vec<_> = rs
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_text).map(str::to_owned))
        .collect();
    assert_eq!(names, ["two", "three"]);

    queue.stop()
}

#[test]
fn failing_batch_applies_no_rows() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;
    queue.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", Vec::new())?;

    let err = queue
        .execute("INSERT INTO t VALUES (?1)", batch([[1], [2], [2]]))
        .unwrap_err();
    assert!(matches!(err, SqlQueueError::Execution { .. }));

    let rs = queue.execute("SELECT count(*) AS n FROM t", Vec::new())?;
    assert_eq!(rs.rows[0].get("n"), Some(&Value::Int(0)));

    queue.stop()
}

#[test]
fn execution_error_names_request_and_worker_keeps_serving() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;

    let err = queue
        .execute("SELECT * FROM missing WHERE id = ?1", params([42]))
        .unwrap_err();
    match err {
        SqlQueueError::Execution {
            statement,
            params: sent,
            message,
        } => {
            assert_eq!(statement, "SELECT * FROM missing WHERE id = ?1");
            assert_eq!(sent, params([42]));
            assert!(message.contains("missing"), "message was {message}");
        }
        other => panic!("expected execution error, got {other:?}"),
    }

    assert!(queue.is_alive());
    let rs = queue.execute("SELECT 5 AS five", Vec::new())?;
    assert_eq!(rs.rows[0].get("five"), Some(&Value::Int(5)));

    queue.stop()
}

#[test]
fn malformed_params_are_rejected_before_queueing() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;

    let mut mixed = params([1]);
    mixed.extend(batch([[2]]));
    let err = queue.execute("INSERT INTO t VALUES (?1)", mixed).unwrap_err();
    assert!(matches!(err, SqlQueueError::Classification(_)));

    let err = queue.execute("   ", Vec::new()).unwrap_err();
    assert!(matches!(err, SqlQueueError::Classification(_)));
    assert_eq!(queue.pending_requests(), 0);

    queue.stop()
}

#[test]
fn concurrent_callers_each_get_their_own_result() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = Arc::new(open_queue(&dir)?);

    let workers: Vec<_> = (0..12_i64)
        .map(|caller| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || -> Result<(), SqlQueueError> {
                for i in 0..40_i64 {
                    let tag = caller * 1_000 + i;
                    let rs = queue.execute("SELECT ?1 AS tag", params([tag]))?;
                    assert_eq!(rs.rows[0].get("tag"), Some(&Value::Int(tag)));
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("caller thread panicked")?;
    }

    assert_eq!(queue.pending_requests(), 0);
    queue.stop()
}

#[test]
fn one_callers_requests_run_in_order() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;
    queue.execute("CREATE TABLE log (seq INTEGER PRIMARY KEY AUTOINCREMENT, v INTEGER)", Vec::new())?;

    for v in 0..50 {
        queue.execute("INSERT INTO log (v) VALUES (?1)", params([v]))?;
    }
    let rs = queue.execute("SELECT v FROM log ORDER BY seq", Vec::new())?;
    let seen: Vec<i64> = rs
        .iter()
        .filter_map(|row| row.get("v").and_then(Value::as_int).copied())
        .collect();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());

    queue.stop()
}

#[test]
fn writes_from_one_thread_are_visible_to_another() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;
    queue.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)", Vec::new())?;

    let writer = queue.clone();
    thread::spawn(move || writer.execute("INSERT INTO kv VALUES ('k', 'v')", Vec::new()))
        .join()
        .expect("writer panicked")?;

    let reader = queue.clone();
    let rs = thread::spawn(move || reader.execute("SELECT v FROM kv WHERE k = 'k'", Vec::new()))
        .join()
        .expect("reader panicked")?;
    assert_eq!(rs.rows[0].get("v"), Some(&Value::Text("v".into())));

    queue.stop()
}

#[tokio::test(flavor = "multi_thread")]
async fn async_callers_share_the_worker() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = open_queue(&dir)?;

    let tasks: Vec<_> = (0..8_i64)
        .map(|n| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.execute_async("SELECT ?1 * 2 AS doubled", params([n])).await })
        })
        .collect();
    for (n, task) in (0_i64..).zip(tasks) {
        let rs = task.await.expect("task panicked")?;
        assert_eq!(rs.rows[0].get("doubled"), Some(&Value::Int(n * 2)));
    }

    tokio::task::spawn_blocking(move || queue.stop())
        .await
        .expect("stop task panicked")
}
