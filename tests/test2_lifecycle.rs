use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use sql_queue::{SqlQueue, SqlQueueError, Value, params};
use tempfile::TempDir;

/// Count rows of `table` in a detached copy of `live`, the way an outside reader would see it.
fn rows_in_copy(live: &Path, scratch: &Path, table: &str) -> i64 {
    let copy = scratch.join("copy.db");
    fs::copy(live, &copy).expect("copy live file");
    let conn = Connection::open(&copy).expect("open copy");
    let count = conn
        .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))
        .unwrap_or(-1);
    drop(conn);
    fs::remove_file(&copy).expect("remove copy");
    count
}

fn artifacts(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<_> = fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default();
    found.sort();
    found
}

fn suffix(path: &Path) -> i64 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('.').next())
        .and_then(|millis| millis.parse().ok())
        .expect("artifact name ends in millis")
}

#[test]
fn commit_makes_writes_durable_in_the_file() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("durable.db");
    let queue = SqlQueue::builder(&db)
        .commit_after_idle(Duration::from_secs(3600))
        .backup_on_stop(false)
        .open()?;

    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    queue.execute("INSERT INTO t VALUES (1)", Vec::new())?;
    queue.commit()?;
    assert_eq!(rows_in_copy(&db, dir.path(), "t"), 1);

    queue.stop()
}

#[test]
fn idle_worker_commits_on_its_own() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("idle.db");
    let queue = SqlQueue::builder(&db)
        .idle_tick(Duration::from_millis(1))
        .commit_after_idle(Duration::from_millis(20))
        .backup_on_stop(false)
        .open()?;

    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    queue.execute("INSERT INTO t VALUES (?1)", params([7]))?;
    thread::sleep(Duration::from_millis(300));
    assert_eq!(rows_in_copy(&db, dir.path(), "t"), 1);

    queue.stop()
}

#[test]
fn explicit_backups_have_increasing_suffixes() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("data.db");
    let queue = SqlQueue::builder(&db).backup_on_stop(false).open()?;
    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    queue.execute("INSERT INTO t VALUES (1)", Vec::new())?;

    let first = queue.backup()?;
    let second = queue.backup()?;
    let third = queue.backup()?;
    assert_eq!(first.parent(), Some(dir.path().join("bak").as_path()));
    assert!(first.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("data.")));
    assert!(suffix(&first) < suffix(&second));
    assert!(suffix(&second) < suffix(&third));

    // the artifact holds the committed row
    let conn = Connection::open(&first)?;
    let count: i64 = conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))?;
    assert_eq!(count, 1);

    // the live database is still held and usable
    queue.execute("INSERT INTO t VALUES (2)", Vec::new())?;
    let rs = queue.execute("SELECT count(*) AS n FROM t", Vec::new())?;
    assert_eq!(rs.rows[0].get("n"), Some(&Value::Int(2)));

    queue.stop()
}

#[test]
fn auto_backup_fires_only_after_changes() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("auto.db");
    let bak = dir.path().join("snapshots");
    let queue = SqlQueue::builder(&db)
        .commit_after_idle(Duration::from_millis(10))
        .auto_backup(Some(Duration::from_millis(30)))
        .backup_dir(&bak)
        .backup_on_stop(false)
        .open()?;

    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    queue.execute("INSERT INTO t VALUES (1)", Vec::new())?;
    thread::sleep(Duration::from_millis(400));
    let after_write = artifacts(&bak).len();
    assert!(after_write >= 1, "expected an automatic backup");

    thread::sleep(Duration::from_millis(200));
    assert_eq!(artifacts(&bak).len(), after_write, "unchanged database was backed up again");

    queue.stop()
}

#[test]
fn auto_backup_fires_after_schema_only_changes() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("schema.db");
    let bak = dir.path().join("snapshots");
    let queue = SqlQueue::builder(&db)
        .commit_after_idle(Duration::from_millis(10))
        .auto_backup(Some(Duration::from_millis(30)))
        .backup_dir(&bak)
        .backup_on_stop(false)
        .open()?;

    // no row is ever inserted
    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    queue.execute("CREATE INDEX t_a ON t (a)", Vec::new())?;
    thread::sleep(Duration::from_millis(400));
    let backed_up = artifacts(&bak);
    assert!(!backed_up.is_empty(), "schema change was never backed up");

    let conn = Connection::open(backed_up.last().expect("at least one artifact"))?;
    let indexes: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND name = 't_a'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(indexes, 1);

    // reads alone do not make the database dirty again
    queue.execute("SELECT count(*) FROM t", Vec::new())?;
    thread::sleep(Duration::from_millis(200));
    assert_eq!(artifacts(&bak).len(), backed_up.len());

    queue.stop()
}

#[test]
fn start_and_stop_backups() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("cycle.db");
    let bak = dir.path().join("bak");

    let queue = SqlQueue::builder(&db).open()?;
    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    queue.execute("INSERT INTO t VALUES (1)", Vec::new())?;
    queue.stop()?;
    let on_stop = artifacts(&bak);
    assert_eq!(on_stop.len(), 1);
    // a fresh queue names artifacts from the clock alone
    thread::sleep(Duration::from_millis(5));

    let queue = SqlQueue::builder(&db)
        .backup_on_start(true)
        .backup_on_stop(false)
        .open()?;
    assert_eq!(artifacts(&bak).len(), 2);
    queue.stop()?;
    assert_eq!(artifacts(&bak).len(), 2);
    Ok(())
}

#[test]
fn failed_backup_leaves_queue_running() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("data.db");
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"occupied")?;
    let queue = SqlQueue::builder(&db)
        .backup_dir(&blocker)
        .backup_on_stop(false)
        .open()?;

    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;
    let err = queue.backup().unwrap_err();
    assert!(matches!(err, SqlQueueError::Backup(_) | SqlQueueError::Io(_)), "got {err:?}");

    assert!(queue.is_alive());
    queue.execute("INSERT INTO t VALUES (1)", Vec::new())?;
    queue.stop()
}

/// Replacing the live file with a directory makes the post-backup reopen fail.
#[cfg(unix)]
#[test]
fn lost_database_after_backup_kills_the_worker() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("doomed.db");
    let queue = SqlQueue::builder(&db).backup_on_stop(false).open()?;
    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;

    // the worker keeps its handle on the unlinked file until the backup closes it
    fs::remove_file(&db)?;
    fs::create_dir(&db)?;

    assert!(queue.backup().is_err());
    assert!(!queue.is_alive());

    let (tx, rx) = std::sync::mpsc::channel();
    let caller = queue.clone();
    thread::spawn(move || {
        let _ = tx.send(caller.execute("SELECT 1", Vec::new()));
    });
    let outcome = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("execute on a dead queue must not hang");
    assert!(matches!(outcome, Err(SqlQueueError::WorkerDead)), "got {outcome:?}");
    assert!(matches!(queue.commit(), Err(SqlQueueError::WorkerDead)));

    queue.stop()
}

#[test]
fn database_is_locked_against_other_openers() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("locked.db");
    let queue = SqlQueue::builder(&db).backup_on_stop(false).open()?;

    let second = SqlQueue::builder(&db).backup_on_stop(false).open();
    assert!(second.is_err(), "a second queue must not open a held file");

    queue.stop()?;
    let reopened = SqlQueue::builder(&db).backup_on_stop(false).open()?;
    reopened.stop()
}

#[test]
fn stop_rejects_later_work_and_is_repeatable() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let queue = SqlQueue::builder(dir.path().join("stop.db"))
        .backup_on_stop(false)
        .open()?;
    queue.execute("SELECT 1", Vec::new())?;

    queue.stop()?;
    assert!(!queue.is_alive());
    assert!(matches!(
        queue.execute("SELECT 1", Vec::new()),
        Err(SqlQueueError::ShutdownInProgress)
    ));
    assert!(matches!(queue.commit(), Err(SqlQueueError::ShutdownInProgress)));
    queue.stop()
}

#[test]
fn stop_under_load_answers_every_caller() -> Result<(), SqlQueueError> {
    let dir = TempDir::new()?;
    let db = dir.path().join("load.db");
    let queue = Arc::new(SqlQueue::builder(&db).backup_on_stop(false).open()?);
    queue.execute("CREATE TABLE t (a INTEGER)", Vec::new())?;

    let callers: Vec<_> = (0..6)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut applied = 0_i64;
                for n in 0..200 {
                    match queue.execute("INSERT INTO t VALUES (?1)", params([n])) {
                        Ok(_) => applied += 1,
                        Err(SqlQueueError::ShutdownInProgress) => break,
                        Err(other) => panic!("unexpected error during shutdown: {other:?}"),
                    }
                }
                applied
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    queue.stop()?;
    let applied: i64 = callers
        .into_iter()
        .map(|caller| caller.join().expect("caller panicked"))
        .sum();

    // everything acknowledged before shutdown was committed by it
    let conn = Connection::open(&db)?;
    let stored: i64 = conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))?;
    assert_eq!(stored, applied);
    Ok(())
}
