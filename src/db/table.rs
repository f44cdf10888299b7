//! Table bindings and the CRUD statement surface.
//!
//! A [`Table`] is the resolved pairing of an entity type and a physical
//! table name. It is stateless except for the cached column catalog,
//! introspected on first use and never refreshed - schema changes require a
//! fresh binding. Every operation runs against the connection bound to the
//! caller's active transaction.

use crate::db::marshal::{self, ColumnCatalog, escape_identifier};
use crate::db::transaction::PgTransaction;
use crate::error::{StoreError, StoreResult};
use crate::models::{AttributeMap, AttributeValue, EntityType};
use sqlx::Row;
use std::collections::VecDeque;
use tokio::sync::OnceCell;
use tracing::debug;

/// Default page size for full-table scans.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One entity type bound to one physical table.
pub struct Table {
    entity: EntityType,
    table_name: String,
    catalog: OnceCell<ColumnCatalog>,
}

impl Table {
    pub(crate) fn new(entity: EntityType, table_name: String) -> Self {
        Self {
            entity,
            table_name,
            catalog: OnceCell::new(),
        }
    }

    pub fn entity(&self) -> &EntityType {
        &self.entity
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Column metadata for the bound table, introspected once and cached
    /// for the binding's lifetime.
    pub async fn column_catalog(
        &self,
        tx: &mut PgTransaction,
    ) -> StoreResult<&ColumnCatalog> {
        self.catalog
            .get_or_try_init(|| marshal::fetch_catalog(tx, &self.table_name))
            .await
    }

    /// Insert a record and return the stored row, re-read so that
    /// engine-computed defaults are reflected.
    pub async fn insert(
        &self,
        tx: &mut PgTransaction,
        attributes: AttributeMap,
    ) -> StoreResult<AttributeMap> {
        let catalog = self.column_catalog(tx).await?;
        let primary_key = self.entity.primary_key();

        let mut columns = Vec::with_capacity(attributes.len());
        let mut values = Vec::with_capacity(attributes.len());
        for (name, value) in &attributes {
            let (column, literal) =
                marshal::encode_attribute(&self.entity, &self.table_name, name, value, catalog)?;
            columns.push(column);
            values.push(literal);
        }

        let sql = build_insert(&self.table_name, &columns, &values, primary_key);
        let row = match tx.fetch_one(&sql).await {
            Ok(row) => row,
            Err(err) if err.is_unique_violation() => {
                let key = attributes
                    .get(primary_key)
                    .map(AttributeValue::display_key)
                    .unwrap_or_else(|| "<generated>".to_string());
                return Err(StoreError::cannot_insert(key, err.to_string()));
            }
            Err(err) => return Err(err),
        };

        let returned = marshal::decode_row(&self.entity, &self.table_name, &row, catalog)?;
        let key = returned.get(primary_key).cloned().ok_or_else(|| {
            StoreError::database("INSERT did not return the primary key", None)
        })?;

        debug!(table = %self.table_name, key = %key.display_key(), "Inserted record");

        self.find(tx, &key).await?.ok_or_else(|| {
            StoreError::database("inserted record vanished before re-read", None)
        })
    }

    /// Look up a record by primary key.
    pub async fn find(
        &self,
        tx: &mut PgTransaction,
        key: &AttributeValue,
    ) -> StoreResult<Option<AttributeMap>> {
        let catalog = self.column_catalog(tx).await?;
        let (key_column, key_literal) = marshal::encode_attribute(
            &self.entity,
            &self.table_name,
            self.entity.primary_key(),
            key,
            catalog,
        )?;
        let sql = build_select_by_key(&self.table_name, &key_column, &key_literal);
        match tx.fetch_optional(&sql).await? {
            Some(row) => Ok(Some(marshal::decode_row(
                &self.entity,
                &self.table_name,
                &row,
                catalog,
            )?)),
            None => Ok(None),
        }
    }

    /// Update an existing record and return the refreshed row. The record
    /// must already exist; the check is explicit so the failure is a
    /// precise typed error rather than a rows-affected inference.
    pub async fn update(
        &self,
        tx: &mut PgTransaction,
        attributes: AttributeMap,
    ) -> StoreResult<AttributeMap> {
        let primary_key = self.entity.primary_key();
        let key = attributes.get(primary_key).cloned().ok_or_else(|| {
            StoreError::validation(
                self.entity.name(),
                format!("update requires the {} attribute", primary_key),
            )
        })?;

        if self.find(tx, &key).await?.is_none() {
            return Err(StoreError::cannot_update(key.display_key(), &self.table_name));
        }

        let catalog = self.column_catalog(tx).await?;
        let mut assignments = Vec::new();
        for (name, value) in &attributes {
            if name == primary_key {
                continue;
            }
            let (column, literal) =
                marshal::encode_attribute(&self.entity, &self.table_name, name, value, catalog)?;
            assignments.push(format!("{} = {}", column, literal));
        }

        if !assignments.is_empty() {
            let (key_column, key_literal) = marshal::encode_attribute(
                &self.entity,
                &self.table_name,
                primary_key,
                &key,
                catalog,
            )?;
            let sql = build_update(&self.table_name, &assignments, &key_column, &key_literal);
            tx.execute(&sql).await?;
        }

        debug!(table = %self.table_name, key = %key.display_key(), "Updated record");

        self.find(tx, &key).await?.ok_or_else(|| {
            StoreError::cannot_update(key.display_key(), &self.table_name)
        })
    }

    /// Delete one record by primary key. The record must exist.
    pub async fn hard_delete(
        &self,
        tx: &mut PgTransaction,
        key: &AttributeValue,
    ) -> StoreResult<()> {
        if self.find(tx, key).await?.is_none() {
            return Err(StoreError::cannot_delete(key.display_key(), &self.table_name));
        }

        let catalog = self.column_catalog(tx).await?;
        let (key_column, key_literal) = marshal::encode_attribute(
            &self.entity,
            &self.table_name,
            self.entity.primary_key(),
            key,
            catalog,
        )?;
        let sql = build_delete(&self.table_name, &key_column, &key_literal);
        tx.execute(&sql).await?;

        debug!(table = %self.table_name, key = %key.display_key(), "Deleted record");
        Ok(())
    }

    /// Delete every record in the table.
    pub async fn hard_delete_all(&self, tx: &mut PgTransaction) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {}", escape_identifier(&self.table_name));
        let deleted = tx.execute(&sql).await?;
        debug!(table = %self.table_name, deleted, "Deleted all records");
        Ok(deleted)
    }

    /// Count the records in the table.
    pub async fn count(&self, tx: &mut PgTransaction) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", escape_identifier(&self.table_name));
        let row = tx.fetch_one(&sql).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    /// Scan the whole table in primary-key order.
    ///
    /// Returns a restartable cursor that fetches keyset-paginated pages of
    /// `page_size` (default 100) rows - each page's predicate is "primary
    /// key greater than the last seen" - so memory stays bounded to one
    /// page and concurrent inserts cannot shift the cursor.
    pub fn all(&self, page_size: Option<usize>) -> RecordScan<'_> {
        RecordScan {
            table: self,
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
            last_key: None,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// Cursor over a full-table scan. Holds the explicit page-fetch state:
/// the last seen primary key and the buffered remainder of the current
/// page. Terminates when a page comes back empty.
pub struct RecordScan<'t> {
    table: &'t Table,
    page_size: usize,
    last_key: Option<AttributeValue>,
    buffered: VecDeque<AttributeMap>,
    exhausted: bool,
}

impl RecordScan<'_> {
    /// Next decoded record, or `None` once the scan is exhausted.
    pub async fn next(&mut self, tx: &mut PgTransaction) -> StoreResult<Option<AttributeMap>> {
        if let Some(record) = self.buffered.pop_front() {
            return Ok(Some(record));
        }
        if self.exhausted {
            return Ok(None);
        }
        self.fetch_page(tx).await?;
        if self.buffered.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        Ok(self.buffered.pop_front())
    }

    /// Drain the remainder of the scan into a vector.
    pub async fn collect_all(&mut self, tx: &mut PgTransaction) -> StoreResult<Vec<AttributeMap>> {
        let mut records = Vec::new();
        while let Some(record) = self.next(tx).await? {
            records.push(record);
        }
        Ok(records)
    }

    async fn fetch_page(&mut self, tx: &mut PgTransaction) -> StoreResult<()> {
        let table = self.table;
        let catalog = table.column_catalog(tx).await?;
        let primary_key = table.entity.primary_key();
        let key_column = escape_identifier(primary_key);

        let predicate = match &self.last_key {
            Some(key) => {
                let (column, literal) = marshal::encode_attribute(
                    &table.entity,
                    &table.table_name,
                    primary_key,
                    key,
                    catalog,
                )?;
                Some(format!("{} > {}", column, literal))
            }
            None => None,
        };

        let sql = build_page_select(
            &table.table_name,
            &key_column,
            predicate.as_deref(),
            self.page_size,
        );
        let rows = tx.fetch_all(&sql).await?;
        for row in &rows {
            let record = marshal::decode_row(&table.entity, &table.table_name, row, catalog)?;
            self.last_key = record.get(primary_key).cloned();
            self.buffered.push_back(record);
        }
        Ok(())
    }
}

// =============================================================================
// Statement Builders
// =============================================================================
//
// Pure text composition over already-escaped fragments; every identifier
// and literal is escaped by the marshaling layer before it arrives here.

fn build_insert(table: &str, columns: &[String], values: &[String], primary_key: &str) -> String {
    if columns.is_empty() {
        return format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            escape_identifier(table),
            escape_identifier(primary_key)
        );
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        escape_identifier(table),
        columns.join(", "),
        values.join(", "),
        escape_identifier(primary_key)
    )
}

fn build_select_by_key(table: &str, key_column: &str, key_literal: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = {}",
        escape_identifier(table),
        key_column,
        key_literal
    )
}

fn build_update(
    table: &str,
    assignments: &[String],
    key_column: &str,
    key_literal: &str,
) -> String {
    format!(
        "UPDATE {} SET {} WHERE {} = {}",
        escape_identifier(table),
        assignments.join(", "),
        key_column,
        key_literal
    )
}

fn build_delete(table: &str, key_column: &str, key_literal: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = {}",
        escape_identifier(table),
        key_column,
        key_literal
    )
}

fn build_page_select(
    table: &str,
    order_column: &str,
    predicate: Option<&str>,
    limit: usize,
) -> String {
    let mut sql = format!("SELECT * FROM {}", escape_identifier(table));
    if let Some(predicate) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    sql.push_str(&format!(" ORDER BY {} ASC LIMIT {}", order_column, limit));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_insert() {
        let sql = build_insert(
            "widgets",
            &["\"foo\"".to_string(), "\"bar\"".to_string()],
            &["1".to_string(), "'x'".to_string()],
            "id",
        );
        assert_eq!(
            sql,
            "INSERT INTO \"widgets\" (\"foo\", \"bar\") VALUES (1, 'x') RETURNING \"id\""
        );
    }

    #[test]
    fn test_build_insert_empty_uses_defaults() {
        let sql = build_insert("widgets", &[], &[], "id");
        assert_eq!(
            sql,
            "INSERT INTO \"widgets\" DEFAULT VALUES RETURNING \"id\""
        );
    }

    #[test]
    fn test_build_select_by_key() {
        let sql = build_select_by_key("widgets", "\"id\"", "42");
        assert_eq!(sql, "SELECT * FROM \"widgets\" WHERE \"id\" = 42");
    }

    #[test]
    fn test_build_update() {
        let sql = build_update(
            "widgets",
            &["\"foo\" = 2".to_string(), "\"bar\" = 'y'".to_string()],
            "\"id\"",
            "42",
        );
        assert_eq!(
            sql,
            "UPDATE \"widgets\" SET \"foo\" = 2, \"bar\" = 'y' WHERE \"id\" = 42"
        );
    }

    #[test]
    fn test_build_delete() {
        let sql = build_delete("widgets", "\"id\"", "42");
        assert_eq!(sql, "DELETE FROM \"widgets\" WHERE \"id\" = 42");
    }

    #[test]
    fn test_build_page_select_first_page() {
        let sql = build_page_select("widgets", "\"id\"", None, 100);
        assert_eq!(
            sql,
            "SELECT * FROM \"widgets\" ORDER BY \"id\" ASC LIMIT 100"
        );
    }

    #[test]
    fn test_build_page_select_keyset_predicate() {
        let sql = build_page_select("widgets", "\"id\"", Some("\"id\" > 42"), 10);
        assert_eq!(
            sql,
            "SELECT * FROM \"widgets\" WHERE \"id\" > 42 ORDER BY \"id\" ASC LIMIT 10"
        );
    }

    #[test]
    fn test_scan_starts_with_empty_state() {
        let table = Table::new(
            EntityType::new("Widget", "id", vec![]),
            "widgets".to_string(),
        );
        let scan = table.all(Some(10));
        assert_eq!(scan.page_size, 10);
        assert!(scan.last_key.is_none());
        assert!(!scan.exhausted);
    }

    #[test]
    fn test_scan_default_page_size() {
        let table = Table::new(
            EntityType::new("Widget", "id", vec![]),
            "widgets".to_string(),
        );
        let scan = table.all(None);
        assert_eq!(scan.page_size, DEFAULT_PAGE_SIZE);
    }
}
