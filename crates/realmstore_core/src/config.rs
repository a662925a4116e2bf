//! Engine configuration.

use std::time::Duration;

/// Configuration for a storage engine.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of connections handed out at once.
    ///
    /// Each active transaction holds exactly one connection.
    pub max_connections: usize,

    /// How long `begin()` waits for a free connection.
    pub acquire_timeout: Duration,

    /// How long a commit or `lock_for_update` waits for a row lock held by
    /// another transaction.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            acquire_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection pool size.
    #[must_use]
    pub const fn max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }

    /// Sets the connection acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(mut self, value: Duration) -> Self {
        self.acquire_timeout = value;
        self
    }

    /// Sets the row lock wait timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, value: Duration) -> Self {
        self.lock_timeout = value;
        self
    }
}
