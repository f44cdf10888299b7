//! Savepoint-backed transactions.
//!
//! The engine offers a single level of flat transaction. Nested logical
//! scopes are emulated with one reusable savepoint checkpoint: `flush`
//! advances the checkpoint past accepted work, `revert` rolls back to it,
//! and the outer transaction stays alive either way. Commit and rollback
//! consume the transaction by value and return its connection to the pool,
//! so a terminated transaction cannot be reused.

use crate::db::pool::Pooled;
use crate::error::StoreResult;
use futures_util::TryStreamExt;
use sqlx::PgConnection;
use sqlx::postgres::PgRow;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// One logical transaction: a checked-out connection bound to a named
/// savepoint. Statements issued through it are strictly ordered.
///
/// Dropping an open transaction abandons the connection; the pool never
/// sees it again. Always terminate through the driver's `commit` or
/// `rollback`.
pub struct PgTransaction {
    conn: Pooled<PgConnection>,
    savepoint: String,
}

impl PgTransaction {
    pub(crate) fn new(conn: Pooled<PgConnection>, savepoint: String) -> Self {
        Self { conn, savepoint }
    }

    /// Name of the savepoint acting as this transaction's checkpoint.
    pub fn savepoint(&self) -> &str {
        &self.savepoint
    }

    pub(crate) fn into_connection(self) -> Pooled<PgConnection> {
        self.conn
    }

    /// Execute a statement, returning the number of rows affected.
    ///
    /// Runs unprepared: every statement arrives fully literal, and the
    /// transaction-control statements (BEGIN, SAVEPOINT, COMMIT, ...) are
    /// utility commands.
    pub(crate) fn execute<'a>(
        &'a mut self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<u64>> + Send + 'a>> {
        debug!(sql = %sql, "Executing statement");
        raw_execute(&mut self.conn.conn, sql)
    }

    /// Execute a query and collect every row.
    pub(crate) fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<PgRow>>> + Send + 'a>> {
        debug!(sql = %sql, "Executing query");
        raw_fetch_all(&mut self.conn.conn, sql)
    }

    /// Execute a query expected to return at most one row.
    pub(crate) fn fetch_optional<'a>(
        &'a mut self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Option<PgRow>>> + Send + 'a>> {
        debug!(sql = %sql, "Executing query");
        raw_fetch_optional(&mut self.conn.conn, sql)
    }

    /// Execute a query expected to return exactly one row.
    pub(crate) fn fetch_one<'a>(
        &'a mut self,
        sql: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<PgRow>> + Send + 'a>> {
        debug!(sql = %sql, "Executing query");
        raw_fetch_one(&mut self.conn.conn, sql)
    }
}

// These free helpers take the connection by an explicitly named, early-bound
// lifetime. Routing the `&mut PgConnection` executor through such a signature
// keeps the borrow's lifetime from being universally quantified when the
// resulting future is required to be `Send`, which otherwise trips the
// "implementation of `Executor` is not general enough" error.
fn raw_execute<'c>(
    conn: &'c mut PgConnection,
    sql: &'c str,
) -> Pin<Box<dyn Future<Output = StoreResult<u64>> + Send + 'c>> {
    Box::pin(async move {
        let result = sqlx::raw_sql(sql).execute(conn).await?;
        Ok(result.rows_affected())
    })
}

fn raw_fetch_all<'c>(
    conn: &'c mut PgConnection,
    sql: &'c str,
) -> Pin<Box<dyn Future<Output = StoreResult<Vec<PgRow>>> + Send + 'c>> {
    Box::pin(async move {
        let rows: Vec<PgRow> = sqlx::query(sql).fetch(conn).try_collect().await?;
        Ok(rows)
    })
}

fn raw_fetch_optional<'c>(
    conn: &'c mut PgConnection,
    sql: &'c str,
) -> Pin<Box<dyn Future<Output = StoreResult<Option<PgRow>>> + Send + 'c>> {
    Box::pin(async move {
        let row = sqlx::query(sql).fetch_optional(conn).await?;
        Ok(row)
    })
}

fn raw_fetch_one<'c>(
    conn: &'c mut PgConnection,
    sql: &'c str,
) -> Pin<Box<dyn Future<Output = StoreResult<PgRow>> + Send + 'c>> {
    Box::pin(async move {
        let row = sqlx::query(sql).fetch_one(conn).await?;
        Ok(row)
    })
}
