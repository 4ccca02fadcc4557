//! Bounded connection pool.
//!
//! Idle connections wait in a FIFO queue. `acquire` hands out the oldest
//! idle connection, opens a new one while below `max_connections`, and
//! otherwise blocks on a condition variable until a connection is returned
//! or `max_queue_wait` elapses. The guard returns its connection on drop and
//! wakes one waiter.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Opens and checks connections for a [`ConnectionPool`].
pub trait ConnectionFactory {
    type Connection: Send;

    fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Runs `query` on the connection; an error means the connection is no
    /// longer usable.
    fn validate(&self, conn: &mut Self::Connection, query: &str) -> Result<(), PoolError>;
}

struct PoolState<C> {
    idle: VecDeque<C>,
    /// Idle plus checked out plus being opened.
    open: usize,
    shut_down: bool,
}

/// Thread-safe pool of connections made by `F`.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Validates the bounds and pre-opens `min_connections`.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        if config.max_connections == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "max_connections must be at least 1".into(),
            });
        }
        if config.min_connections > config.max_connections {
            return Err(PoolError::InvalidConfig {
                reason: format!(
                    "min_connections ({}) exceeds max_connections ({})",
                    config.min_connections, config.max_connections
                ),
            });
        }

        let mut idle = VecDeque::with_capacity(config.max_connections);
        for _ in 0..config.min_connections {
            idle.push_back(factory.connect()?);
        }
        tracing::debug!(
            min = config.min_connections,
            max = config.max_connections,
            "connection pool started"
        );

        Ok(ConnectionPool {
            factory,
            state: Mutex::new(PoolState {
                open: idle.len(),
                idle,
                shut_down: false,
            }),
            config,
            available: Condvar::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connections currently idle in the queue.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Connections currently open, idle or checked out.
    pub fn open_count(&self) -> usize {
        self.state.lock().open
    }

    /// Checks out a connection, waiting up to `max_queue_wait`.
    pub fn acquire(&self) -> Result<PooledConnection<'_, F>, PoolError> {
        let started = Instant::now();
        let deadline = started + self.config.max_queue_wait();
        let mut state = self.state.lock();
        loop {
            if state.shut_down {
                return Err(PoolError::ShutDown);
            }
            if let Some(conn) = state.idle.pop_front() {
                drop(state);
                return self.checkout(conn);
            }
            if state.open < self.config.max_connections {
                state.open += 1;
                drop(state);
                return match self.factory.connect() {
                    Ok(conn) => self.checkout(conn),
                    Err(err) => {
                        self.release_slot();
                        Err(err)
                    }
                };
            }
            if self.available.wait_until(&mut state, deadline).timed_out()
                && state.idle.is_empty()
                && state.open >= self.config.max_connections
            {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(waited_ms, "connection pool exhausted");
                return Err(PoolError::Exhausted { waited_ms });
            }
        }
    }

    /// Closes idle connections and rejects further `acquire` calls.
    /// Checked-out connections are closed when their guards drop.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        let closed = state.idle.len();
        state.idle.clear();
        state.open -= closed;
        self.available.notify_all();
        tracing::debug!(closed, "connection pool shut down");
    }

    /// Validates a connection about to be handed out, reconnecting once if
    /// validation fails. The caller already owns the connection's slot.
    fn checkout(&self, mut conn: F::Connection) -> Result<PooledConnection<'_, F>, PoolError> {
        let Some(query) = self.config.validation_query.as_deref() else {
            return Ok(PooledConnection::new(self, conn));
        };
        if let Err(err) = self.factory.validate(&mut conn, query) {
            tracing::warn!(error = %err, "discarding connection that failed validation");
            drop(conn);
            conn = match self
                .factory
                .connect()
                .and_then(|mut fresh| self.factory.validate(&mut fresh, query).map(|()| fresh))
            {
                Ok(fresh) => fresh,
                Err(retry) => {
                    self.release_slot();
                    return Err(PoolError::Validation {
                        reason: retry.to_string(),
                    });
                }
            };
        }
        Ok(PooledConnection::new(self, conn))
    }

    fn give_back(&self, conn: F::Connection) {
        let mut state = self.state.lock();
        if state.shut_down {
            state.open -= 1;
            return;
        }
        state.idle.push_back(conn);
        self.available.notify_one();
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.open -= 1;
        self.available.notify_one();
    }
}

/// A checked-out connection. Dereferences to the connection.
pub struct PooledConnection<'p, F: ConnectionFactory> {
    pool: &'p ConnectionPool<F>,
    /// Always `Some` until drop.
    conn: Option<F::Connection>,
    discard: bool,
}

impl<'p, F: ConnectionFactory> PooledConnection<'p, F> {
    fn new(pool: &'p ConnectionPool<F>, conn: F::Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            discard: false,
        }
    }

    /// Closes the connection instead of returning it to the pool.
    pub fn invalidate(mut self) {
        self.discard = true;
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<'_, F> {
    fn deref_mut(&mut self) -> &mut F::Connection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<'_, F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.discard {
            drop(conn);
            self.pool.release_slot();
        } else {
            self.pool.give_back(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Hands out numbered fake connections; connections listed in `broken`
    /// fail validation.
    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
        broken: Mutex<Vec<usize>>,
        refuse: std::sync::atomic::AtomicBool,
    }

    impl ConnectionFactory for CountingFactory {
        type Connection = usize;

        fn connect(&self) -> Result<usize, PoolError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(PoolError::Connect {
                    reason: "refused".into(),
                });
            }
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }

        fn validate(&self, conn: &mut usize, _query: &str) -> Result<(), PoolError> {
            if self.broken.lock().contains(conn) {
                Err(PoolError::Validation {
                    reason: format!("connection {conn} is broken"),
                })
            } else {
                Ok(())
            }
        }
    }

    fn config(min: usize, max: usize, wait_ms: u64) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            max_queue_wait_ms: wait_ms,
            validation_query: None,
        }
    }

    #[test]
    fn rejects_bad_bounds() {
        assert!(matches!(
            ConnectionPool::new(CountingFactory::default(), config(3, 2, 10)),
            Err(PoolError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ConnectionPool::new(CountingFactory::default(), config(0, 0, 10)),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn preopens_min_and_reuses_fifo() {
        let pool = ConnectionPool::new(CountingFactory::default(), config(2, 4, 10)).unwrap();
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.open_count(), 2);

        let first = pool.acquire().unwrap();
        assert_eq!(*first, 0);
        drop(first);
        // 0 went to the back of the queue, 1 is now oldest.
        assert_eq!(*pool.acquire().unwrap(), 1);
    }

    #[test]
    fn grows_to_max_then_times_out() {
        let pool = ConnectionPool::new(CountingFactory::default(), config(0, 2, 30)).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.open_count(), 2);

        let started = Instant::now();
        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert!(started.elapsed() >= Duration::from_millis(30));

        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn release_wakes_waiter() {
        let pool = Arc::new(ConnectionPool::new(CountingFactory::default(), config(1, 1, 5_000)).unwrap());
        let held = pool.acquire().unwrap();
        let id = *held;

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().map(|conn| *conn).ok())
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert_eq!(waiter.join().unwrap(), Some(id));
    }

    #[test]
    fn failed_validation_reconnects_once() {
        let factory = CountingFactory::default();
        factory.broken.lock().push(0);
        let mut cfg = config(1, 1, 10);
        cfg.validation_query = Some("SELECT 1".into());
        let pool = ConnectionPool::new(factory, cfg).unwrap();

        let conn = pool.acquire().unwrap();
        assert_eq!(*conn, 1);
        drop(conn);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn failed_reconnect_frees_slot() {
        let factory = CountingFactory::default();
        factory.broken.lock().push(0);
        let mut cfg = config(1, 1, 10);
        cfg.validation_query = Some("SELECT 1".into());
        let pool = ConnectionPool::new(factory, cfg).unwrap();
        pool.factory.refuse.store(true, Ordering::SeqCst);

        assert!(matches!(pool.acquire(), Err(PoolError::Validation { .. })));
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn invalidate_discards_connection() {
        let pool = ConnectionPool::new(CountingFactory::default(), config(1, 1, 10)).unwrap();
        pool.acquire().unwrap().invalidate();
        assert_eq!(pool.open_count(), 0);
        assert_eq!(*pool.acquire().unwrap(), 1);
    }

    #[test]
    fn shutdown_rejects_acquire() {
        let pool = ConnectionPool::new(CountingFactory::default(), config(2, 2, 10)).unwrap();
        let held = pool.acquire().unwrap();
        pool.shutdown();
        assert!(matches!(pool.acquire(), Err(PoolError::ShutDown)));
        drop(held);
        assert_eq!(pool.open_count(), 0);
    }
}
