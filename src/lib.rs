//! PostgreSQL CRUD driver for typed entity records.
//!
//! Persists and retrieves typed records through PostgreSQL behind a uniform
//! CRUD surface (insert, find, update, delete, scan, count) over nested,
//! revertible transactions. Three pieces do the heavy lifting:
//!
//! - a bounded connection pool that hands sessions out exclusively and
//!   fails loudly on exhaustion,
//! - a savepoint-backed transaction protocol that layers flushable,
//!   revertible checkpoints on the engine's flat transactions,
//! - a bidirectional attribute/column marshaling layer with safe literal
//!   construction and keyset-paginated scanning.

pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod models;

pub use config::{ConnectionSource, PgCredentials};
pub use driver::{CrudDriver, PostgresCrudDriver};
pub use error::{StoreError, StoreResult};
pub use models::{AttributeKind, AttributeMap, AttributeValue, EntityType};
