//! Bounded connection pool.
//!
//! The pool owns up to `max_connections` engine connections plus a factory
//! that creates new ones on demand. Checkout hands a connection out for
//! exclusive use; checkin reclaims it. Exhaustion is a hard error, not a
//! queue: more concurrent transactions than the configured pool size is a
//! configuration bug, never a transient condition.
//!
//! The pool is generic over the connection type so its invariants are
//! testable without a live engine; the driver instantiates it at
//! `C = sqlx::PgConnection`.

use crate::error::{StoreError, StoreResult};
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default pool cap.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

type Connector<C> = Box<dyn Fn() -> BoxFuture<'static, StoreResult<C>> + Send + Sync>;

/// A connection on loan from the pool.
///
/// The id ties it back to the pool's in-use set; the wrapped connection is
/// exclusively owned by the holder until checkin.
pub struct Pooled<C> {
    id: u64,
    pub conn: C,
}

impl<C> Pooled<C> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct PoolState<C> {
    available: Vec<Pooled<C>>,
    in_use: HashSet<u64>,
    next_id: u64,
}

/// Bounded set of engine connections shared across logical transactions
/// over time but never concurrently.
pub struct ConnectionPool<C> {
    max_connections: usize,
    connector: Connector<C>,
    state: Mutex<PoolState<C>>,
}

impl<C: Send + 'static> ConnectionPool<C> {
    pub fn new(
        max_connections: usize,
        connector: impl Fn() -> BoxFuture<'static, StoreResult<C>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_connections,
            connector: Box::new(connector),
            state: Mutex::new(PoolState {
                available: Vec::new(),
                in_use: HashSet::new(),
                next_id: 0,
            }),
        }
    }

    /// Create a pool pre-seeded with one already-open connection. The seed
    /// counts toward the cap.
    pub fn with_seed(
        max_connections: usize,
        connector: impl Fn() -> BoxFuture<'static, StoreResult<C>> + Send + Sync + 'static,
        seed: C,
    ) -> Self {
        Self {
            max_connections,
            connector: Box::new(connector),
            state: Mutex::new(PoolState {
                available: vec![Pooled { id: 0, conn: seed }],
                in_use: HashSet::new(),
                next_id: 1,
            }),
        }
    }

    /// Check a connection out of the pool.
    ///
    /// Returns an available connection if one exists, creates a new one if
    /// the cap allows, and otherwise fails with [`StoreError::PoolExhausted`]
    /// without creating anything. Never blocks waiting for a checkin.
    pub async fn checkout(&self) -> StoreResult<Pooled<C>> {
        let mut state = self.state.lock().await;

        if let Some(pooled) = state.available.pop() {
            state.in_use.insert(pooled.id);
            debug!(connection_id = pooled.id, "Checked out pooled connection");
            return Ok(pooled);
        }

        if state.in_use.len() >= self.max_connections {
            return Err(StoreError::PoolExhausted {
                in_use: state.in_use.len(),
                max: self.max_connections,
            });
        }

        // The lock is held across connect, so checkouts are serialized and
        // the cap cannot be raced past.
        let conn = (self.connector)().await?;
        let id = state.next_id;
        state.next_id += 1;
        state.in_use.insert(id);
        debug!(connection_id = id, "Opened new pooled connection");
        Ok(Pooled { id, conn })
    }

    /// Return a connection to the available set.
    ///
    /// Checking in a connection the pool does not consider in use is a
    /// caller error; it is logged and dropped rather than admitted.
    pub async fn checkin(&self, pooled: Pooled<C>) {
        let mut state = self.state.lock().await;
        if !state.in_use.remove(&pooled.id) {
            warn!(
                connection_id = pooled.id,
                "Checkin of a connection not in use; dropping it"
            );
            return;
        }
        debug!(connection_id = pooled.id, "Checked in pooled connection");
        state.available.push(pooled);
    }

    /// Apply `close` to every available connection and empty both sets.
    ///
    /// Connections currently checked out are owned by their transactions and
    /// cannot be reached from here; their ids are forgotten, so they will
    /// not be accepted back.
    pub async fn clear<F, Fut>(&self, mut close: F)
    where
        F: FnMut(C) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut state = self.state.lock().await;
        for pooled in state.available.drain(..) {
            close(pooled.conn).await;
        }
        state.in_use.clear();
    }

    pub async fn available_count(&self) -> usize {
        self.state.lock().await.available.len()
    }

    pub async fn in_use_count(&self) -> usize {
        self.state.lock().await.in_use.len()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
