//! Searchable field declarations.

use realmstore_codec::{Value, ValueType};
use std::fmt;

/// Semantic type of a searchable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Text values. Identifiers are strings at this level.
    String,
    /// Integer values.
    Number,
    /// Boolean values.
    Boolean,
}

impl FieldType {
    /// Returns true if `value` is a literal of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value.value_type()),
            (FieldType::String, ValueType::Text)
                | (FieldType::Number, ValueType::Integer)
                | (FieldType::Boolean, ValueType::Bool)
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A field that criteria can be built over.
///
/// Declared once per kind as a constant. Ordinal fields additionally accept
/// the `GT` and `LT` operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchableField {
    name: &'static str,
    ty: FieldType,
    ordinal: bool,
}

impl SearchableField {
    /// Declares a string field.
    #[must_use]
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::String,
            ordinal: false,
        }
    }

    /// Declares a number field.
    #[must_use]
    pub const fn number(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Number,
            ordinal: false,
        }
    }

    /// Declares a boolean field.
    #[must_use]
    pub const fn boolean(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Boolean,
            ordinal: false,
        }
    }

    /// Marks the field as ordered, enabling `GT` and `LT`.
    #[must_use]
    pub const fn ordinal(mut self) -> Self {
        self.ordinal = true;
        self
    }

    /// Field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Semantic type.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        self.ty
    }

    /// Whether range operators apply.
    #[must_use]
    pub const fn is_ordinal(&self) -> bool {
        self.ordinal
    }
}

impl fmt::Display for SearchableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
