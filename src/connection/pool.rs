use super::{Connection, config::ConnectionConfig};
use crate::core::{DbError, Result};
use crate::facade::InMemoryEngine;
use crate::query::Statement;
use crate::result::QueryResult;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Connection pool
///
/// Hands out connections to one shared engine, bounded by
/// `max_connections`. Returned connections are parked up to `max_idle`;
/// expired or idle-too-long connections are closed on the next checkout.
pub struct ConnectionPool {
    config: ConnectionConfig,
    shared: Arc<PoolShared>,
    engine: Arc<InMemoryEngine>,
    next_id: AtomicU64,
}

/// State reachable from guards, which outlive borrows of the pool.
struct PoolShared {
    available: Mutex<VecDeque<PooledConnection>>,
    total_connections: AtomicUsize,
    max_idle: usize,
}

struct PooledConnection {
    connection: Connection,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConnection {
    fn new(connection: Connection, created_at: Instant) -> Self {
        Self {
            connection,
            created_at,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }
}

impl ConnectionPool {
    /// Pool over a fresh, private engine.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::new_with_engine(config, Arc::new(InMemoryEngine::new()))
    }

    pub fn new_with_engine(config: ConnectionConfig, engine: Arc<InMemoryEngine>) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            available: Mutex::new(VecDeque::new()),
            total_connections: AtomicUsize::new(0),
            max_idle: config.max_idle.min(config.max_connections),
        });

        let pool = Self {
            config,
            shared,
            engine,
            next_id: AtomicU64::new(1),
        };

        pool.ensure_min_connections()?;
        debug!(url = %pool.config.to_url(), max_connections = pool.config.max_connections, "connection pool ready");

        Ok(pool)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<InMemoryEngine> {
        &self.engine
    }

    /// Get a connection from the pool, waiting up to `connect_timeout`.
    pub async fn get_connection(&self) -> Result<PoolGuard> {
        let start = Instant::now();
        let mut warned = false;

        loop {
            if let Some(pooled) = self.try_get_available()? {
                return Ok(self.guard(pooled.connection, pooled.created_at));
            }

            if let Some(connection) = self.try_create_connection() {
                return Ok(self.guard(connection, Instant::now()));
            }

            if start.elapsed() > self.config.connect_timeout {
                warn!(
                    max_connections = self.config.max_connections,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "connection pool timeout"
                );
                return Err(DbError::PoolTimeout(self.config.connect_timeout));
            }

            if !warned {
                warn!(
                    max_connections = self.config.max_connections,
                    "connection pool exhausted, waiting for a connection"
                );
                warned = true;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn guard(&self, connection: Connection, created_at: Instant) -> PoolGuard {
        PoolGuard {
            connection: Some(connection),
            created_at,
            shared: Arc::clone(&self.shared),
        }
    }

    fn try_get_available(&self) -> Result<Option<PooledConnection>> {
        let mut available = self.shared.available.lock()?;

        let before = available.len();
        available.retain(|pooled| {
            !pooled.is_expired(self.config.max_lifetime) && !pooled.is_idle_too_long(self.config.idle_timeout)
        });
        let removed = before - available.len();
        if removed > 0 {
            self.shared.total_connections.fetch_sub(removed, Ordering::SeqCst);
            debug!(removed, "closed expired pooled connections");
        }

        Ok(available.pop_front())
    }

    /// Reserves a slot under `max_connections` and opens a connection in it.
    fn try_create_connection(&self) -> Option<Connection> {
        let reserved = self
            .shared
            .total_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < self.config.max_connections).then_some(total + 1)
            });
        if reserved.is_err() {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Some(Connection::new(id, Arc::clone(&self.engine)))
    }

    fn ensure_min_connections(&self) -> Result<()> {
        let mut available = self.shared.available.lock()?;
        while self.shared.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let connection = Connection::new(id, Arc::clone(&self.engine));
            available.push_back(PooledConnection::new(connection, Instant::now()));
            self.shared.total_connections.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let available = self
            .shared
            .available
            .lock()
            .map(|available| available.len())
            .unwrap_or(0);
        let total = self.shared.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available,
            active_connections: total.saturating_sub(available),
            max_connections: self.config.max_connections,
            max_idle: self.shared.max_idle,
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
    pub max_idle: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {} (idle {})",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections,
            self.max_idle
        )
    }
}

/// RAII guard for pooled connections
///
/// Dropping the guard rolls back an open transaction and returns the
/// connection to the pool.
pub struct PoolGuard {
    connection: Option<Connection>,
    created_at: Instant,
    shared: Arc<PoolShared>,
}

impl PoolGuard {
    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::ExecutionError("Connection already returned to pool".into()))
    }

    pub async fn execute(&mut self, stmt: &Statement) -> Result<QueryResult> {
        self.connection()?.execute(stmt).await
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.connection()?.begin().await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.connection()?.commit().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.connection()?.rollback().await
    }

    pub fn is_in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(Connection::is_in_transaction)
    }

    /// Rolls back any open transaction and hands the connection back.
    pub async fn close(mut self) -> Result<()> {
        if self.is_in_transaction() {
            self.rollback().await?;
        }
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        connection.abort();

        match self.shared.available.lock() {
            Ok(mut available) if available.len() < self.shared.max_idle => {
                available.push_back(PooledConnection::new(connection, self.created_at));
            }
            _ => {
                connection.close();
                self.shared.total_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.release();
    }
}
