//! Entity type declarations.
//!
//! This is the interface boundary with the surrounding entity type system:
//! for each entity type, the primary-key attribute name, the ordered set of
//! declared attributes with their semantic type tags, and a validating
//! constructor that accepts a raw attribute mapping and returns a
//! well-typed one or fails.

use crate::error::{StoreError, StoreResult};
use crate::models::value::{AttributeMap, AttributeValue};

/// Semantic type tag for one declared attribute.
///
/// A closed set: marshaling matches exhaustively over these tags, and any
/// pairing with a column type outside the supported table is a typed error,
/// never a silent coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Integer,
    Text,
    Symbol,
    Timestamp,
    Document,
    ReferenceArray(Box<AttributeKind>),
}

impl AttributeKind {
    /// Whether a value inhabits this kind. Null is admitted by every kind;
    /// nullability is a column property, not a kind property.
    pub fn admits(&self, value: &AttributeValue) -> bool {
        match (self, value) {
            (_, AttributeValue::Null) => true,
            (Self::Integer, AttributeValue::Integer(_)) => true,
            (Self::Text, AttributeValue::Text(_)) => true,
            (Self::Symbol, AttributeValue::Symbol(_)) => true,
            (Self::Timestamp, AttributeValue::Timestamp(_)) => true,
            (Self::Document, AttributeValue::Document(_)) => true,
            (Self::ReferenceArray(element), AttributeValue::ReferenceArray(values)) => {
                values.iter().all(|v| element.admits(v))
            }
            _ => false,
        }
    }
}

/// Declared schema of one entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    name: String,
    primary_key: String,
    attributes: Vec<(String, AttributeKind)>,
}

impl EntityType {
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        attributes: Vec<(String, AttributeKind)>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn attributes(&self) -> &[(String, AttributeKind)] {
        &self.attributes
    }

    /// Declared kind of an attribute, if any.
    pub fn kind_of(&self, attribute: &str) -> Option<&AttributeKind> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, kind)| kind)
    }

    /// Validating constructor: rejects undeclared attributes and kind
    /// mismatches, returning the mapping unchanged when it is well-typed.
    pub fn validate(&self, attributes: AttributeMap) -> StoreResult<AttributeMap> {
        for (name, value) in &attributes {
            let kind = self.kind_of(name).ok_or_else(|| {
                StoreError::validation(&self.name, format!("undeclared attribute {}", name))
            })?;
            if !kind.admits(value) {
                return Err(StoreError::validation(
                    &self.name,
                    format!("attribute {} does not match its declared type", name),
                ));
            }
        }
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> EntityType {
        EntityType::new(
            "Widget",
            "id",
            vec![
                ("id".to_string(), AttributeKind::Integer),
                ("name".to_string(), AttributeKind::Text),
                ("status".to_string(), AttributeKind::Symbol),
                (
                    "part_ids".to_string(),
                    AttributeKind::ReferenceArray(Box::new(AttributeKind::Integer)),
                ),
            ],
        )
    }

    #[test]
    fn test_kind_of() {
        let entity = widget();
        assert_eq!(entity.kind_of("id"), Some(&AttributeKind::Integer));
        assert_eq!(entity.kind_of("name"), Some(&AttributeKind::Text));
        assert_eq!(entity.kind_of("nope"), None);
    }

    #[test]
    fn test_validate_accepts_well_typed_mapping() {
        let entity = widget();
        let mut attributes = AttributeMap::new();
        attributes.insert("id".to_string(), AttributeValue::Integer(1));
        attributes.insert("name".to_string(), AttributeValue::Text("bolt".into()));
        attributes.insert(
            "part_ids".to_string(),
            AttributeValue::ReferenceArray(vec![
                AttributeValue::Integer(2),
                AttributeValue::Integer(3),
            ]),
        );
        assert!(entity.validate(attributes).is_ok());
    }

    #[test]
    fn test_validate_rejects_undeclared_attribute() {
        let entity = widget();
        let mut attributes = AttributeMap::new();
        attributes.insert("color".to_string(), AttributeValue::Text("red".into()));
        assert!(matches!(
            entity.validate(attributes),
            Err(StoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_kind_mismatch() {
        let entity = widget();
        let mut attributes = AttributeMap::new();
        attributes.insert("id".to_string(), AttributeValue::Text("one".into()));
        assert!(matches!(
            entity.validate(attributes),
            Err(StoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_admits_null_for_any_kind() {
        let entity = widget();
        let mut attributes = AttributeMap::new();
        attributes.insert("name".to_string(), AttributeValue::Null);
        assert!(entity.validate(attributes).is_ok());
    }

    #[test]
    fn test_reference_array_elements_checked() {
        let entity = widget();
        let mut attributes = AttributeMap::new();
        attributes.insert(
            "part_ids".to_string(),
            AttributeValue::ReferenceArray(vec![AttributeValue::Text("two".into())]),
        );
        assert!(entity.validate(attributes).is_err());
    }
}
