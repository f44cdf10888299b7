//! Driver facade.
//!
//! [`PostgresCrudDriver`] is the object handed to the surrounding
//! persistence coordinator: it owns the connection pool, opens and
//! terminates savepoint-backed transactions, and produces table bindings.
//! The [`CrudDriver`] trait is the capability surface - any storage engine
//! implementing it is substitutable for this one.

use crate::config::ConnectionSource;
use crate::db::marshal::escape_identifier;
use crate::db::pool::{ConnectionPool, DEFAULT_MAX_CONNECTIONS};
use crate::db::table::Table;
use crate::db::transaction::PgTransaction;
use crate::error::{StoreError, StoreResult};
use crate::models::EntityType;
use futures_util::FutureExt;
use sqlx::{Connection, PgConnection};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// Capability interface for an entity CRUD driver: transaction control plus
/// table binding.
pub trait CrudDriver {
    type Transaction;
    type TableBinding;

    fn open_transaction(
        &self,
    ) -> impl Future<Output = StoreResult<Self::Transaction>> + Send;
    fn flush(
        &self,
        tx: &mut Self::Transaction,
    ) -> impl Future<Output = StoreResult<()>> + Send;
    fn revert(
        &self,
        tx: &mut Self::Transaction,
    ) -> impl Future<Output = StoreResult<()>> + Send;
    fn commit(&self, tx: Self::Transaction) -> impl Future<Output = StoreResult<()>> + Send;
    fn rollback(&self, tx: Self::Transaction) -> impl Future<Output = StoreResult<()>> + Send;
    fn open_table(&self, entity: EntityType, table_name: &str) -> Self::TableBinding;
}

/// PostgreSQL-backed entity CRUD driver.
pub struct PostgresCrudDriver {
    pool: ConnectionPool<PgConnection>,
    instance_tag: String,
    savepoint_counter: AtomicU64,
}

impl PostgresCrudDriver {
    /// Connect with the default pool cap.
    pub async fn connect(source: ConnectionSource) -> StoreResult<Self> {
        Self::connect_with(source, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect, bounding the pool at `max_connections`.
    ///
    /// The URL is probed with one real connection, so a bad configuration
    /// fails here rather than at first use; the probe seeds the pool.
    pub async fn connect_with(
        source: ConnectionSource,
        max_connections: usize,
    ) -> StoreResult<Self> {
        let url = source.resolve_url()?;
        let probe = PgConnection::connect(&url).await.map_err(StoreError::from)?;
        info!(max_connections, "Connected to PostgreSQL");

        let pool = ConnectionPool::with_seed(
            max_connections,
            move || {
                let url = url.clone();
                async move { PgConnection::connect(&url).await.map_err(StoreError::from) }.boxed()
            },
            probe,
        );
        Ok(Self::from_pool(pool))
    }

    /// Connect using the `DATABASE_URL` environment variable.
    pub async fn connect_from_env() -> StoreResult<Self> {
        Self::connect(ConnectionSource::from_env()?).await
    }

    /// Wrap a single pre-opened connection. The pool is capped at one and
    /// cannot grow.
    pub fn with_connection(conn: PgConnection) -> Self {
        let pool = ConnectionPool::with_seed(
            1,
            || async { Err(StoreError::NoConnectionSource) }.boxed(),
            conn,
        );
        Self::from_pool(pool)
    }

    fn from_pool(pool: ConnectionPool<PgConnection>) -> Self {
        Self {
            pool,
            instance_tag: Uuid::new_v4().simple().to_string(),
            savepoint_counter: AtomicU64::new(0),
        }
    }

    /// Savepoint names are engine-global identifiers within a session;
    /// deriving them from the instance tag and a counter keeps them
    /// collision-free across concurrently open transactions.
    fn next_savepoint(&self) -> String {
        let n = self.savepoint_counter.fetch_add(1, Ordering::Relaxed);
        format!("sp_{}_{}", self.instance_tag, n)
    }

    /// Open a logical transaction: check a connection out, begin an engine
    /// transaction, and establish the first checkpoint.
    pub fn open_transaction(
        &self,
    ) -> Pin<Box<dyn Future<Output = StoreResult<PgTransaction>> + Send + '_>> {
        Box::pin(async move {
            let pooled = self.pool.checkout().await?;
            let savepoint = self.next_savepoint();
            let mut tx = PgTransaction::new(pooled, savepoint);
            tx.execute("BEGIN").await?;
            tx.execute(&format!("SAVEPOINT {}", escape_identifier(tx.savepoint())))
                .await?;
            debug!(savepoint = %tx.savepoint(), "Opened transaction");
            Ok(tx)
        })
    }

    /// Advance the checkpoint past all work done since the previous one.
    pub fn flush<'a>(
        &'a self,
        tx: &'a mut PgTransaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let savepoint = escape_identifier(tx.savepoint());
            tx.execute(&format!("RELEASE SAVEPOINT {}", savepoint)).await?;
            tx.execute(&format!("SAVEPOINT {}", savepoint)).await?;
            debug!(savepoint = %tx.savepoint(), "Flushed transaction");
            Ok(())
        })
    }

    /// Discard all engine-visible effects since the last checkpoint. The
    /// outer transaction and its connection stay alive and reusable.
    pub fn revert<'a>(
        &'a self,
        tx: &'a mut PgTransaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let savepoint = escape_identifier(tx.savepoint());
            tx.execute(&format!("ROLLBACK TO SAVEPOINT {}", savepoint))
                .await?;
            debug!(savepoint = %tx.savepoint(), "Reverted transaction");
            Ok(())
        })
    }

    /// Commit the engine transaction and return the connection to the pool.
    pub fn commit(
        &self,
        mut tx: PgTransaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        Box::pin(async move {
            tx.execute("COMMIT").await?;
            info!(savepoint = %tx.savepoint(), "Transaction committed");
            self.pool.checkin(tx.into_connection()).await;
            Ok(())
        })
    }

    /// Roll the engine transaction back and return the connection to the
    /// pool.
    pub fn rollback(
        &self,
        mut tx: PgTransaction,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        Box::pin(async move {
            tx.execute("ROLLBACK").await?;
            info!(savepoint = %tx.savepoint(), "Transaction rolled back");
            self.pool.checkin(tx.into_connection()).await;
            Ok(())
        })
    }

    /// Bind an entity type to a physical table. Table-name resolution is
    /// the coordinator's job; the driver takes the resolved name.
    pub fn open_table(&self, entity: EntityType, table_name: impl Into<String>) -> Table {
        Table::new(entity, table_name.into())
    }

    /// Close every pooled connection and empty the pool. Explicit teardown
    /// for test isolation.
    pub async fn close(&self) {
        self.pool
            .clear(|conn| async move {
                let _ = conn.close().await;
            })
            .await;
        info!("Driver closed");
    }
}

impl CrudDriver for PostgresCrudDriver {
    type Transaction = PgTransaction;
    type TableBinding = Table;

    async fn open_transaction(&self) -> StoreResult<PgTransaction> {
        PostgresCrudDriver::open_transaction(self).await
    }

    async fn flush(&self, tx: &mut PgTransaction) -> StoreResult<()> {
        PostgresCrudDriver::flush(self, tx).await
    }

    async fn revert(&self, tx: &mut PgTransaction) -> StoreResult<()> {
        PostgresCrudDriver::revert(self, tx).await
    }

    async fn commit(&self, tx: PgTransaction) -> StoreResult<()> {
        PostgresCrudDriver::commit(self, tx).await
    }

    async fn rollback(&self, tx: PgTransaction) -> StoreResult<()> {
        PostgresCrudDriver::rollback(self, tx).await
    }

    fn open_table(&self, entity: EntityType, table_name: &str) -> Table {
        PostgresCrudDriver::open_table(self, entity, table_name)
    }
}
