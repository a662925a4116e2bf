//! Bounded connection pool.
//!
//! Every active storage transaction owns exactly one [`Connection`]. The
//! connection goes back to the pool when it is dropped, so it is released
//! on every exit path of the transaction: commit, rollback, error or drop.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PoolShared {
    backend: &'static str,
    max: usize,
    acquire_timeout: Duration,
    in_use: Mutex<usize>,
    released: Condvar,
    available: AtomicBool,
    next_id: AtomicU64,
}

/// A fixed-size pool of backend connections.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Creates a pool for `backend` handing out at most `max` connections.
    #[must_use]
    pub fn new(backend: &'static str, max: usize, acquire_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                backend,
                max: max.max(1),
                acquire_timeout,
                in_use: Mutex::new(0),
                released: Condvar::new(),
                available: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Takes a connection, waiting up to the acquire timeout for one to be
    /// released.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`] if the backend is down or
    /// no connection became free in time.
    pub fn acquire(&self) -> CoreResult<Connection> {
        self.ensure_available()?;

        let deadline = Instant::now() + self.shared.acquire_timeout;
        let mut in_use = self.shared.in_use.lock();
        while *in_use >= self.shared.max {
            if self
                .shared
                .released
                .wait_until(&mut in_use, deadline)
                .timed_out()
                && *in_use >= self.shared.max
            {
                tracing::warn!(
                    backend = self.shared.backend,
                    max = self.shared.max,
                    "connection pool exhausted"
                );
                return Err(CoreError::backend_unavailable(
                    self.shared.backend,
                    format!(
                        "no connection available within {:?}",
                        self.shared.acquire_timeout
                    ),
                ));
            }
        }
        *in_use += 1;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(backend = self.shared.backend, connection = id, "connection acquired");
        Ok(Connection {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Fails if the backend is currently unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`].
    pub fn ensure_available(&self) -> CoreResult<()> {
        if self.shared.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::backend_unavailable(
                self.shared.backend,
                "connection refused",
            ))
        }
    }

    /// Marks the backend reachable or unreachable.
    ///
    /// While unreachable, acquiring a connection and every operation that
    /// uses one fails with [`CoreError::BackendUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    /// Number of connections currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        *self.shared.in_use.lock()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("backend", &self.shared.backend)
            .field("max", &self.shared.max)
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Returned to the pool on drop.
pub struct Connection {
    id: u64,
    shared: Arc<PoolShared>,
}

impl Connection {
    /// Connection number, unique within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fails if the backend became unreachable while this connection was
    /// held.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`].
    pub fn check(&self) -> CoreResult<()> {
        if self.shared.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::backend_unavailable(
                self.shared.backend,
                "connection lost",
            ))
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let mut in_use = self.shared.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.shared.released.notify_one();
        tracing::trace!(backend = self.shared.backend, connection = self.id, "connection released");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("backend", &self.shared.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drop_releases_connection() {
        let pool = ConnectionPool::new("test", 1, Duration::from_millis(10));
        let conn = pool.acquire().unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(conn);
        assert_eq!(pool.in_use(), 0);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = ConnectionPool::new("test", 1, Duration::from_millis(20));
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(err.is_transaction_fatal());
    }

    #[test]
    fn waiter_gets_released_connection() {
        let pool = ConnectionPool::new("test", 1, Duration::from_secs(5));
        let held = pool.acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().map(|c| c.id()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn outage_fails_acquire_and_check() {
        let pool = ConnectionPool::new("test", 2, Duration::from_millis(10));
        let conn = pool.acquire().unwrap();
        pool.set_available(false);
        assert!(conn.check().is_err());
        assert!(pool.acquire().is_err());
        pool.set_available(true);
        assert!(conn.check().is_ok());
    }
}
