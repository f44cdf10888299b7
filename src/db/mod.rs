//! Storage engine access layer.
//!
//! This module provides everything between the driver facade and the wire
//! client:
//! - Bounded connection pool
//! - Savepoint-backed transactions
//! - Attribute/column marshaling and escaping
//! - Table bindings and CRUD statement construction

pub mod marshal;
pub mod pool;
pub mod table;
pub mod transaction;

pub use marshal::{ColumnCatalog, ColumnMeta};
pub use pool::{ConnectionPool, DEFAULT_MAX_CONNECTIONS, Pooled};
pub use table::{DEFAULT_PAGE_SIZE, RecordScan, Table};
pub use transaction::PgTransaction;
