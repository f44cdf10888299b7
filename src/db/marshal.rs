//! Attribute/column marshaling.
//!
//! Bidirectional conversion between typed attribute values and the engine's
//! column representation, driven by column metadata introspected once per
//! table binding. Every string fragment destined for SQL text goes through
//! the escaping helpers here; no value is ever interpolated unescaped.
//!
//! # Architecture
//!
//! Encoding is a closed match over the attribute kind / column type-family
//! pairs the store supports. Any pairing outside that table is a
//! [`StoreError::UnsupportedColumnType`] - a configuration error, never a
//! silent coercion. Decoding is the per-column inverse, cascading `try_get`
//! calls across the width variants of each engine type family.

use crate::db::transaction::PgTransaction;
use crate::error::{StoreError, StoreResult};
use crate::models::{AttributeKind, AttributeMap, AttributeValue, EntityType};
use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row};
use std::collections::HashMap;

/// Canonical text form for timestamp-without-timezone literals.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// =============================================================================
// Escaping
// =============================================================================

/// Escape an identifier for direct SQL-text interpolation: wrapped in double
/// quotes with internal quote-doubling.
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Escape a string literal: wrapped in single quotes with internal
/// quote-doubling.
pub fn escape_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// =============================================================================
// Column Metadata
// =============================================================================

/// Metadata for one column of a bound table.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// information_schema declared type, lowercased ("integer", "text",
    /// "timestamp without time zone", "jsonb", "array", ...).
    pub data_type: String,
    pub nullable: bool,
    /// Element udt name for array columns ("int4", "text", ...).
    pub element_type: Option<String>,
}

/// Column metadata for one table, keyed by column name. Populated once per
/// table binding and never mutated afterward.
#[derive(Debug, Clone, Default)]
pub struct ColumnCatalog {
    columns: HashMap<String, ColumnMeta>,
}

impl ColumnCatalog {
    pub fn get(&self, column: &str) -> Option<&ColumnMeta> {
        self.columns.get(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, ColumnMeta)> for ColumnCatalog {
    fn from_iter<I: IntoIterator<Item = (String, ColumnMeta)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Introspect the target table's columns.
///
/// One round-trip against information_schema; the caller caches the result
/// for the lifetime of the table binding.
pub async fn fetch_catalog(
    tx: &mut PgTransaction,
    table_name: &str,
) -> StoreResult<ColumnCatalog> {
    let sql = format!(
        "SELECT column_name, data_type, is_nullable, udt_name \
         FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = {} \
         ORDER BY ordinal_position",
        escape_literal(table_name)
    );
    let rows = tx.fetch_all(&sql).await?;
    if rows.is_empty() {
        return Err(StoreError::unknown_table(table_name));
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        let is_nullable: String = row.try_get("is_nullable")?;
        let udt_name: String = row.try_get("udt_name")?;

        let data_type = data_type.to_lowercase();
        let element_type = if data_type == "array" {
            udt_name.strip_prefix('_').map(str::to_string)
        } else {
            None
        };

        columns.push((
            name,
            ColumnMeta {
                data_type,
                nullable: is_nullable == "YES",
                element_type,
            },
        ));
    }
    Ok(columns.into_iter().collect())
}

// =============================================================================
// Type Families
// =============================================================================

fn is_integer_family(data_type: &str) -> bool {
    matches!(data_type, "integer" | "bigint" | "smallint")
}

fn is_text_family(data_type: &str) -> bool {
    matches!(data_type, "text" | "character varying" | "character")
}

fn is_timestamp_family(data_type: &str) -> bool {
    data_type == "timestamp without time zone"
}

fn is_json_family(data_type: &str) -> bool {
    matches!(data_type, "json" | "jsonb")
}

fn is_integer_element(udt: &str) -> bool {
    matches!(udt, "int2" | "int4" | "int8")
}

fn is_text_element(udt: &str) -> bool {
    matches!(udt, "text" | "varchar")
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode one named attribute into an (escaped column identifier, SQL
/// literal) pair, checking the attribute's semantic kind against the
/// column's declared type.
pub fn encode_attribute(
    entity: &EntityType,
    table: &str,
    attribute: &str,
    value: &AttributeValue,
    catalog: &ColumnCatalog,
) -> StoreResult<(String, String)> {
    let column = catalog
        .get(attribute)
        .ok_or_else(|| StoreError::unknown_column(attribute, table))?;
    let kind = entity.kind_of(attribute).ok_or_else(|| {
        StoreError::validation(
            entity.name(),
            format!("undeclared attribute {}", attribute),
        )
    })?;
    let literal = encode_value(entity, table, attribute, kind, value, column)?;
    Ok((escape_identifier(attribute), literal))
}

fn encode_value(
    entity: &EntityType,
    table: &str,
    attribute: &str,
    kind: &AttributeKind,
    value: &AttributeValue,
    column: &ColumnMeta,
) -> StoreResult<String> {
    // Null first: nullability is decided by the column, not the kind.
    if value.is_null() {
        if column.nullable {
            return Ok("NULL".to_string());
        }
        return Err(StoreError::unexpected_null(attribute, table));
    }

    match (kind, value) {
        (AttributeKind::Integer, AttributeValue::Integer(n))
            if is_integer_family(&column.data_type) =>
        {
            Ok(n.to_string())
        }
        (AttributeKind::Text, AttributeValue::Text(s))
        | (AttributeKind::Symbol, AttributeValue::Symbol(s))
            if is_text_family(&column.data_type) =>
        {
            Ok(escape_literal(s))
        }
        (AttributeKind::Timestamp, AttributeValue::Timestamp(ts))
            if is_timestamp_family(&column.data_type) =>
        {
            Ok(escape_literal(&ts.format(TIMESTAMP_FORMAT).to_string()))
        }
        (AttributeKind::Document, AttributeValue::Document(doc))
            if is_json_family(&column.data_type) =>
        {
            let json = serde_json::to_string(doc)
                .map_err(|e| StoreError::database(format!("JSON serialization: {}", e), None))?;
            Ok(escape_literal(&json))
        }
        (AttributeKind::ReferenceArray(_), AttributeValue::ReferenceArray(values))
            if column.data_type == "array" =>
        {
            let element_type = column.element_type.as_deref().ok_or_else(|| {
                StoreError::unsupported_column_type("array", attribute, entity.name())
            })?;
            encode_array(entity, attribute, values, element_type)
        }
        _ => Err(StoreError::unsupported_column_type(
            &column.data_type,
            attribute,
            entity.name(),
        )),
    }
}

/// Encode an array of entity references as an engine array literal, each
/// element through the encoder for the column's declared element type.
fn encode_array(
    entity: &EntityType,
    attribute: &str,
    values: &[AttributeValue],
    element_type: &str,
) -> StoreResult<String> {
    let encode_element = element_encoder(element_type).ok_or_else(|| {
        StoreError::unsupported_column_type(
            format!("{}[]", element_type),
            attribute,
            entity.name(),
        )
    })?;

    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        let part = encode_element(value).ok_or_else(|| {
            StoreError::unsupported_column_type(
                format!("{}[]", element_type),
                attribute,
                entity.name(),
            )
        })?;
        parts.push(part);
    }
    // The cast keeps empty arrays typed. element_type only reaches here for
    // the udt names matched by element_encoder, so interpolating it is safe.
    Ok(format!("ARRAY[{}]::{}[]", parts.join(", "), element_type))
}

/// Element-type-specific encoder for array columns.
fn element_encoder(element_type: &str) -> Option<fn(&AttributeValue) -> Option<String>> {
    if is_integer_element(element_type) {
        Some(|value| match value {
            AttributeValue::Integer(n) => Some(n.to_string()),
            _ => None,
        })
    } else if is_text_element(element_type) {
        Some(|value| match value {
            AttributeValue::Text(s) | AttributeValue::Symbol(s) => Some(escape_literal(s)),
            _ => None,
        })
    } else {
        None
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one engine row back into a typed attribute mapping, then pass it
/// through the entity's validating constructor.
pub fn decode_row(
    entity: &EntityType,
    table: &str,
    row: &PgRow,
    catalog: &ColumnCatalog,
) -> StoreResult<AttributeMap> {
    let mut attributes = AttributeMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let meta = catalog
            .get(name)
            .ok_or_else(|| StoreError::unknown_column(name, table))?;
        let kind = entity.kind_of(name).ok_or_else(|| {
            StoreError::validation(
                entity.name(),
                format!("column {} has no declared attribute", name),
            )
        })?;
        let value = decode_column(entity, row, idx, name, table, kind, meta)?;
        attributes.insert(name.to_string(), value);
    }
    entity.validate(attributes)
}

fn decode_column(
    entity: &EntityType,
    row: &PgRow,
    idx: usize,
    column: &str,
    table: &str,
    kind: &AttributeKind,
    meta: &ColumnMeta,
) -> StoreResult<AttributeValue> {
    let decoded = match kind {
        AttributeKind::Integer => decode_integer(row, idx)?.map(AttributeValue::Integer),
        AttributeKind::Text => row
            .try_get::<Option<String>, _>(idx)?
            .map(AttributeValue::Text),
        AttributeKind::Symbol => row
            .try_get::<Option<String>, _>(idx)?
            .map(AttributeValue::Symbol),
        AttributeKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(AttributeValue::Timestamp),
        AttributeKind::Document => row
            .try_get::<Option<JsonValue>, _>(idx)?
            .map(AttributeValue::Document),
        AttributeKind::ReferenceArray(element) => {
            decode_array(entity, row, idx, column, element, meta)?
                .map(AttributeValue::ReferenceArray)
        }
    };

    match decoded {
        Some(value) => Ok(value),
        None if meta.nullable => Ok(AttributeValue::Null),
        None => Err(StoreError::unexpected_null(column, table)),
    }
}

/// Integer columns come back at the width the engine declares; cascade
/// through the widths and widen to i64.
fn decode_integer(row: &PgRow, idx: usize) -> StoreResult<Option<i64>> {
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return Ok(v.map(i64::from));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(v.map(i64::from));
    }
    Ok(row.try_get::<Option<i64>, _>(idx)?)
}

fn decode_array(
    entity: &EntityType,
    row: &PgRow,
    idx: usize,
    column: &str,
    element: &AttributeKind,
    meta: &ColumnMeta,
) -> StoreResult<Option<Vec<AttributeValue>>> {
    let element_type = meta
        .element_type
        .as_deref()
        .ok_or_else(|| StoreError::unsupported_column_type("array", column, entity.name()))?;

    if is_integer_element(element_type) {
        let values = decode_integer_array(row, idx)?;
        return Ok(values.map(|vs| vs.into_iter().map(AttributeValue::Integer).collect()));
    }

    if is_text_element(element_type) {
        let values = row.try_get::<Option<Vec<String>>, _>(idx)?;
        let wrap = match element {
            AttributeKind::Symbol => AttributeValue::Symbol as fn(String) -> AttributeValue,
            _ => AttributeValue::Text,
        };
        return Ok(values.map(|vs| vs.into_iter().map(wrap).collect()));
    }

    Err(StoreError::unsupported_column_type(
        format!("{}[]", element_type),
        column,
        entity.name(),
    ))
}

fn decode_integer_array(row: &PgRow, idx: usize) -> StoreResult<Option<Vec<i64>>> {
    if let Ok(v) = row.try_get::<Option<Vec<i16>>, _>(idx) {
        return Ok(v.map(|vs| vs.into_iter().map(i64::from).collect()));
    }
    if let Ok(v) = row.try_get::<Option<Vec<i32>>, _>(idx) {
        return Ok(v.map(|vs| vs.into_iter().map(i64::from).collect()));
    }
    Ok(row.try_get::<Option<Vec<i64>>, _>(idx)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn column(data_type: &str, nullable: bool) -> ColumnMeta {
        ColumnMeta {
            data_type: data_type.to_string(),
            nullable,
            element_type: None,
        }
    }

    fn array_column(element_type: &str, nullable: bool) -> ColumnMeta {
        ColumnMeta {
            data_type: "array".to_string(),
            nullable,
            element_type: Some(element_type.to_string()),
        }
    }

    fn widget() -> EntityType {
        EntityType::new(
            "Widget",
            "id",
            vec![
                ("id".to_string(), AttributeKind::Integer),
                ("name".to_string(), AttributeKind::Text),
                ("status".to_string(), AttributeKind::Symbol),
                ("created_at".to_string(), AttributeKind::Timestamp),
                ("profile".to_string(), AttributeKind::Document),
                (
                    "part_ids".to_string(),
                    AttributeKind::ReferenceArray(Box::new(AttributeKind::Integer)),
                ),
            ],
        )
    }

    fn catalog() -> ColumnCatalog {
        [
            ("id".to_string(), column("integer", false)),
            ("name".to_string(), column("text", true)),
            ("status".to_string(), column("text", true)),
            (
                "created_at".to_string(),
                column("timestamp without time zone", true),
            ),
            ("profile".to_string(), column("jsonb", true)),
            ("part_ids".to_string(), array_column("int4", true)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("widgets"), "\"widgets\"");
        assert_eq!(escape_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("plain"), "'plain'");
        assert_eq!(escape_literal("it's"), "'it''s'");
        assert_eq!(escape_literal("a''b"), "'a''''b'");
    }

    #[test]
    fn test_encode_integer() {
        let (ident, literal) =
            encode_attribute(&widget(), "widgets", "id", &AttributeValue::Integer(42), &catalog())
                .unwrap();
        assert_eq!(ident, "\"id\"");
        assert_eq!(literal, "42");
    }

    #[test]
    fn test_encode_text_and_symbol_quote() {
        let (_, literal) = encode_attribute(
            &widget(),
            "widgets",
            "name",
            &AttributeValue::Text("bo'lt".into()),
            &catalog(),
        )
        .unwrap();
        assert_eq!(literal, "'bo''lt'");

        let (_, literal) = encode_attribute(
            &widget(),
            "widgets",
            "status",
            &AttributeValue::Symbol("active".into()),
            &catalog(),
        )
        .unwrap();
        assert_eq!(literal, "'active'");
    }

    #[test]
    fn test_encode_timestamp_canonical_form() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_micro_opt(13, 45, 30, 123456)
            .unwrap();
        let (_, literal) = encode_attribute(
            &widget(),
            "widgets",
            "created_at",
            &AttributeValue::Timestamp(ts),
            &catalog(),
        )
        .unwrap();
        assert_eq!(literal, "'2024-05-17 13:45:30.123456'");
    }

    #[test]
    fn test_encode_document_compact_json() {
        let doc = serde_json::json!({"tags": ["a", "b"], "weight": 3});
        let (_, literal) = encode_attribute(
            &widget(),
            "widgets",
            "profile",
            &AttributeValue::Document(doc),
            &catalog(),
        )
        .unwrap();
        assert_eq!(literal, "'{\"tags\":[\"a\",\"b\"],\"weight\":3}'");
    }

    #[test]
    fn test_encode_document_quotes_escaped() {
        let doc = serde_json::json!({"note": "it's"});
        let (_, literal) = encode_attribute(
            &widget(),
            "widgets",
            "profile",
            &AttributeValue::Document(doc),
            &catalog(),
        )
        .unwrap();
        assert_eq!(literal, "'{\"note\":\"it''s\"}'");
    }

    #[test]
    fn test_encode_reference_array() {
        let value = AttributeValue::ReferenceArray(vec![
            AttributeValue::Integer(7),
            AttributeValue::Integer(8),
        ]);
        let (_, literal) =
            encode_attribute(&widget(), "widgets", "part_ids", &value, &catalog()).unwrap();
        assert_eq!(literal, "ARRAY[7, 8]::int4[]");
    }

    #[test]
    fn test_encode_empty_array_stays_typed() {
        let value = AttributeValue::ReferenceArray(vec![]);
        let (_, literal) =
            encode_attribute(&widget(), "widgets", "part_ids", &value, &catalog()).unwrap();
        assert_eq!(literal, "ARRAY[]::int4[]");
    }

    #[test]
    fn test_encode_null_into_nullable() {
        let (_, literal) =
            encode_attribute(&widget(), "widgets", "name", &AttributeValue::Null, &catalog())
                .unwrap();
        assert_eq!(literal, "NULL");
    }

    #[test]
    fn test_encode_null_into_non_nullable_fails() {
        let err =
            encode_attribute(&widget(), "widgets", "id", &AttributeValue::Null, &catalog())
                .unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedNull { .. }));
    }

    #[test]
    fn test_encode_unknown_column_fails() {
        let err = encode_attribute(
            &widget(),
            "widgets",
            "color",
            &AttributeValue::Text("red".into()),
            &catalog(),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn test_encode_kind_column_mismatch_fails() {
        // Integer attribute against a text column
        let mut mismatched = catalog();
        mismatched.columns.insert("id".to_string(), column("text", false));
        let err = encode_attribute(
            &widget(),
            "widgets",
            "id",
            &AttributeValue::Integer(1),
            &mismatched,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedColumnType { .. }));
    }

    #[test]
    fn test_encode_unsupported_element_type_fails() {
        let mut cat = catalog();
        cat.columns
            .insert("part_ids".to_string(), array_column("uuid", true));
        let value = AttributeValue::ReferenceArray(vec![]);
        let err = encode_attribute(&widget(), "widgets", "part_ids", &value, &cat).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedColumnType { pg_type, .. } if pg_type == "uuid[]"
        ));
    }

    #[test]
    fn test_type_families() {
        assert!(is_integer_family("integer"));
        assert!(is_integer_family("bigint"));
        assert!(is_integer_family("smallint"));
        assert!(!is_integer_family("numeric"));

        assert!(is_text_family("text"));
        assert!(is_text_family("character varying"));
        assert!(!is_text_family("bytea"));

        assert!(is_timestamp_family("timestamp without time zone"));
        assert!(!is_timestamp_family("timestamp with time zone"));

        assert!(is_json_family("json"));
        assert!(is_json_family("jsonb"));
    }
}
