//! Connection handling for the `SQLite` store.
//!
//! Mutex acquisition with poison recovery, pragma setup, and the
//! transaction wrapper every write goes through.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Busy timeout applied to every connection, in milliseconds.
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// `synchronous` pragma level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Synchronous {
    /// fsync at WAL checkpoints only; `flush` forces the checkpoint.
    #[default]
    Normal,
    /// fsync on every commit.
    Full,
}

impl Synchronous {
    const fn as_pragma(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Acquires a mutex, recovering the guard if a previous holder panicked.
///
/// A poisoned connection mutex is logged and counted, then used as is:
/// `SQLite` rolls back any transaction the panicking holder left open.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Applies journal, sync and busy-timeout pragmas.
///
/// In-memory databases ignore WAL and report the `memory` journal mode.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if a pragma cannot be applied.
pub fn configure_connection(conn: &Connection, synchronous: Synchronous) -> Result<()> {
    // journal_mode returns a row, so it cannot go through execute_batch.
    let _: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(|e| pragma_error("journal_mode", &e))?;
    conn.pragma_update(None, "synchronous", synchronous.as_pragma())
        .map_err(|e| pragma_error("synchronous", &e))?;
    conn.busy_timeout(Duration::from_millis(u64::from(BUSY_TIMEOUT_MS)))
        .map_err(|e| pragma_error("busy_timeout", &e))?;
    Ok(())
}

fn pragma_error(pragma: &str, e: &rusqlite::Error) -> Error {
    Error::OperationFailed {
        operation: format!("pragma_{pragma}"),
        cause: e.to_string(),
    }
}

/// Runs `body` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back on error.
///
/// # Errors
///
/// Returns the error of `body`, or [`Error::OperationFailed`] if the
/// transaction cannot be opened or committed.
pub fn with_transaction<T>(
    conn: &Connection,
    body: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| Error::OperationFailed {
            operation: "begin_transaction".to_string(),
            cause: e.to_string(),
        })?;

    match body(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(Error::OperationFailed {
                    operation: "commit_transaction".to_string(),
                    cause: e.to_string(),
                });
            }
            Ok(value)
        },
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    *acquire_lock(&mutex) += 1;
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*acquire_lock(&mutex), 10);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_acquire_lock_recovers_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 1);
    }

    #[test]
    fn test_configure_connection_full_sync() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn, Synchronous::Full).unwrap();

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 2, "Expected FULL synchronous mode (2)");

        let busy_timeout: u32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, BUSY_TIMEOUT_MS);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        let result: Result<()> = with_transaction(&conn, |conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", []).unwrap();
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
