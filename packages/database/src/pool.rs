//! Bounded pool of `DuckDB` connections.
//!
//! Every connection is a clone of one root connection, so all of them see
//! the same database (including an in-memory one). A semaphore caps the
//! number checked out at once. A [`PooledConnection`] returns itself to
//! the pool when dropped, whether the task finished, failed, or panicked;
//! an uncommitted `duckdb::Transaction` on it has already rolled back by
//! then.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use duckdb::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::DbError;

/// A fixed-size pool of connections to one database.
pub struct ConnectionPool {
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl ConnectionPool {
    /// Creates a pool allowing at most `size` connections checked out at
    /// once. Connections are cloned from `root` lazily.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Conversion`] if `size` is zero.
    pub fn new(root: Connection, size: usize) -> Result<Arc<Self>, DbError> {
        if size == 0 {
            return Err(DbError::Conversion {
                message: "connection pool size must be at least 1".to_string(),
            });
        }

        Ok(Arc::new(Self {
            root: Mutex::new(root),
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    /// Maximum number of connections checked out at once.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of connections currently checked out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Waits for a free slot and checks out a connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the pool is closed or a new connection cannot
    /// be cloned from the root.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, DbError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed)?;

        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let conn = match reused {
            Some(conn) => conn,
            None => self
                .root
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_clone()?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Stops handing out connections. Pending and future
    /// [`Self::acquire`] calls fail with [`DbError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }

    fn release(&self, conn: Connection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}

/// A connection checked out of a [`ConnectionPool`].
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    // Dropped after `Drop::drop` has returned the connection.
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_size_is_rejected() {
        let root = Connection::open_in_memory().unwrap();
        assert!(ConnectionPool::new(root, 0).is_err());
    }

    #[tokio::test]
    async fn connections_share_one_database() {
        let root = Connection::open_in_memory().unwrap();
        root.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (42);")
            .unwrap();
        let pool = ConnectionPool::new(root, 2).unwrap();

        let conn = pool.acquire().await.unwrap();
        let x: i32 = conn
            .prepare("SELECT x FROM t")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(x, 42);
    }

    #[tokio::test]
    async fn drop_returns_connection_to_pool() {
        let pool = ConnectionPool::new(Connection::open_in_memory().unwrap(), 1).unwrap();

        let first = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(first);
        assert_eq!(pool.in_use(), 0);

        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 1);
        assert_eq!(pool.idle.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn uncommitted_transaction_rolls_back_on_release() {
        let root = Connection::open_in_memory().unwrap();
        root.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        let pool = ConnectionPool::new(root, 1).unwrap();

        {
            let mut conn = pool.acquire().await.unwrap();
            let tx = conn.transaction().unwrap();
            tx.execute_batch("INSERT INTO t VALUES (1);").unwrap();
        }

        let conn = pool.acquire().await.unwrap();
        let n: i64 = conn
            .prepare("SELECT COUNT(*) FROM t")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn panicking_task_releases_its_connection() {
        let pool = ConnectionPool::new(Connection::open_in_memory().unwrap(), 1).unwrap();

        let task_pool = Arc::clone(&pool);
        let result = tokio::spawn(async move {
            let _conn = task_pool.acquire().await.unwrap();
            panic!("region task failed");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(pool.in_use(), 0);
        let _conn = pool.acquire().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_pool_size() {
        let pool = ConnectionPool::new(Connection::open_in_memory().unwrap(), 3).unwrap();
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _conn = pool.acquire().await.unwrap();
                    peak.fetch_max(pool.in_use(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let pool = ConnectionPool::new(Connection::open_in_memory().unwrap(), 1).unwrap();
        pool.close();
        assert!(matches!(pool.acquire().await, Err(DbError::PoolClosed)));
    }
}
