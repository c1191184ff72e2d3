//! Connection pool with scoped leases.
//!
//! A lease returns its connection when dropped, so every acquired connection
//! is released exactly once on success, error and early-abandon paths alike.
//! The idle set is an optimization, not a capacity bound: concurrent acquires
//! that find it empty simply open more connections.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::ClientError;

/// Opens and closes native connections for a [`ConnectionPool`].
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> Result<Self::Connection, ClientError>;

    fn close(&self, conn: Self::Connection) -> Result<(), ClientError>;
}

pub struct ConnectionPool<M: ConnectionManager> {
    manager: M,
    persist: bool,
    closed: AtomicBool,
    idle: Mutex<Vec<M::Connection>>,
}

impl<M: ConnectionManager> ConnectionPool<M> {
    pub fn new(manager: M, persist: bool) -> Self {
        Self {
            manager,
            persist,
            closed: AtomicBool::new(false),
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Lease a connection, reusing an idle one when persistence is enabled.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection<M>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        if self.persist {
            let reused = self
                .idle
                .lock()
                .map_err(|_| ClientError::Internal("connection pool mutex poisoned".to_string()))?
                .pop();
            if let Some(conn) = reused {
                debug!("reusing idle connection");
                return Ok(PooledConnection::new(conn, self.clone()));
            }
        }

        let conn = self.manager.connect().map_err(|err| match err {
            ClientError::Closed | ClientError::Connection(_) => err,
            other => ClientError::Connection(other.to_string()),
        })?;
        Ok(PooledConnection::new(conn, self.clone()))
    }

    fn release(&self, conn: M::Connection) {
        let mut idle = match self.idle.lock() {
            Ok(idle) => idle,
            Err(_) => {
                self.close_quietly(conn);
                return;
            }
        };
        // Checked under the idle lock so a concurrent close_all never misses a push.
        if self.closed.load(Ordering::SeqCst) || !self.persist {
            drop(idle);
            self.close_quietly(conn);
            return;
        }
        idle.push(conn);
        debug!(idle = idle.len(), "connection returned to pool");
    }

    fn close_quietly(&self, conn: M::Connection) {
        if let Err(err) = self.manager.close(conn) {
            warn!(error = %err, "failed to close connection");
        }
    }

    /// Close every idle connection and refuse further acquires.
    ///
    /// Individual close failures are logged, never propagated. Returns
    /// `false` when the pool had already been closed.
    pub fn close_all(&self) -> bool {
        let drained = match self.idle.lock() {
            Ok(mut idle) => {
                if self.closed.swap(true, Ordering::SeqCst) {
                    return false;
                }
                std::mem::take(&mut *idle)
            }
            Err(poisoned) => {
                if self.closed.swap(true, Ordering::SeqCst) {
                    return false;
                }
                std::mem::take(&mut *poisoned.into_inner())
            }
        };

        let count = drained.len();
        for conn in drained {
            self.close_quietly(conn);
        }
        debug!(closed = count, "connection pool closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// A leased connection, released back to its pool on drop.
pub struct PooledConnection<M: ConnectionManager> {
    conn: Option<M::Connection>,
    pool: Arc<ConnectionPool<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    fn new(conn: M::Connection, pool: Arc<ConnectionPool<M>>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.close_quietly(conn);
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Hands out numbered connections and counts connect/close calls.
    #[derive(Default)]
    pub(crate) struct CountingManager {
        pub(crate) connects: AtomicUsize,
        pub(crate) closes: AtomicUsize,
        fail_connect: AtomicBool,
        fail_close: AtomicBool,
    }

    impl ConnectionManager for CountingManager {
        type Connection = usize;

        fn connect(&self) -> Result<usize, ClientError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(ClientError::Connection("refused".to_string()));
            }
            Ok(self.connects.fetch_add(1, Ordering::SeqCst))
        }

        fn close(&self, _conn: usize) -> Result<(), ClientError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(ClientError::Connection("close failed".to_string()));
            }
            Ok(())
        }
    }

    fn pool(persist: bool) -> Arc<ConnectionPool<CountingManager>> {
        Arc::new(ConnectionPool::new(CountingManager::default(), persist))
    }

    #[test]
    fn persistent_pool_reuses_released_connection() {
        let pool = pool(true);
        let first = *pool.acquire().unwrap();
        let lease = pool.acquire().unwrap();
        assert_eq!(*lease, first);
        drop(lease);
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn non_persistent_pool_closes_on_release() {
        let pool = pool(false);
        let a = *pool.acquire().unwrap();
        let b = *pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn concurrent_leases_get_distinct_connections() {
        let pool = pool(true);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(*a, *b);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn release_count_matches_acquire_count() {
        let pool = pool(false);
        for _ in 0..5 {
            let lease = pool.acquire().unwrap();
            if *lease % 2 == 0 {
                lease.discard();
            }
        }
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 5);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn close_all_is_idempotent_and_swallows_failures() {
        let pool = pool(true);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a);
        drop(b);
        pool.manager().fail_close.store(true, Ordering::SeqCst);

        assert!(pool.close_all());
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 2);
        assert!(!pool.close_all());
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.acquire(), Err(ClientError::Closed)));
    }

    #[test]
    fn release_after_close_closes_connection() {
        let pool = pool(true);
        let lease = pool.acquire().unwrap();
        pool.close_all();
        drop(lease);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn connect_failure_is_a_connection_error() {
        let pool = pool(true);
        pool.manager().fail_connect.store(true, Ordering::SeqCst);
        assert!(matches!(pool.acquire(), Err(ClientError::Connection(_))));
    }
}
