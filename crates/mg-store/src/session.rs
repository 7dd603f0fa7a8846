//! Connection driver with per-operation session scoping.
//!
//! One long-lived [`Driver`] exists per database file (init at startup,
//! dropped at shutdown). Every store operation acquires its own
//! short-lived [`Session`] and releases it unconditionally on every
//! exit path — sessions are never shared across concurrent calls, and
//! none is held across another operation's work.

use std::ops::Deref;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

pub struct Driver {
    conn: Mutex<Connection>,
}

impl Driver {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Driver {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Driver {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire a session scoped to the caller's stack frame.
    /// Dropping the session releases the connection even on early
    /// returns and panics. A poisoned lock is recovered rather than
    /// propagated — a panicked writer leaves SQLite itself consistent.
    pub fn session(&self) -> Session<'_> {
        let guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Session { guard }
    }
}

pub struct Session<'a> {
    guard: MutexGuard<'a, Connection>,
}

impl Deref for Session<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_sessions() {
        let driver = Driver::open_in_memory().unwrap();
        {
            let s = driver.session();
            s.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        // First session released; a second acquisition must not deadlock.
        let s = driver.session();
        s.execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
        let n: i64 = s
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_session_released_on_early_exit() {
        let driver = Driver::open_in_memory().unwrap();

        fn failing_op(driver: &Driver) -> Result<()> {
            let s = driver.session();
            s.execute("SELECT * FROM missing_table", [])?;
            Ok(())
        }

        assert!(failing_op(&driver).is_err());
        // The error path must have released the session.
        let _s = driver.session();
    }

    #[test]
    fn test_driver_shared_across_threads() {
        use std::sync::Arc;

        let driver = Arc::new(Driver::open_in_memory().unwrap());
        driver
            .session()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let driver = Arc::clone(&driver);
                std::thread::spawn(move || {
                    let s = driver.session();
                    s.execute("INSERT INTO t (x) VALUES (?1)", [i]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let n: i64 = driver
            .session()
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 8);
    }
}
