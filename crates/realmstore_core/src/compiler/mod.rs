//! Criteria compilers.
//!
//! Each backend has a compiler turning a [`Criteria`] into its native query
//! form, parameterized by the kind's [`KindSchema`]. Compilation is
//! deterministic and has no side effects. A combination the backend cannot
//! express is rejected with [`CoreError::UnsupportedCriterion`]; nothing is
//! ever silently dropped.
//!
//! Legality rules are shared by every compiler:
//!
//! - the field must be searchable in the kind,
//! - `GT`/`LT` apply to ordinal column or side-document fields only,
//! - identifier fields accept `EQ`, `NE` and `IN`; a literal that is not a
//!   valid native key can never match, so it compiles to a constant
//!   instead of an error,
//! - join-backed fields accept `EQ` and `IN`.

mod map;
mod relational;

pub use map::{MapCompiler, MapPredicate};
pub use relational::{JoinCondition, Operand, RelationalCompiler, SqlPredicate};

use crate::criteria::{Comparison, Criteria, Operator};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::schema::{FieldMapping, KindSchema};
use realmstore_codec::Value;
use std::cmp::Ordering;

/// Translates criteria into a backend query.
pub trait CriteriaCompiler {
    /// Backend query representation.
    type Query;

    /// Compiles `criteria` against the layout of `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedCriterion`] for any leaf the backend
    /// cannot express.
    fn compile(&self, schema: &KindSchema, criteria: &Criteria) -> CoreResult<Self::Query>;
}

/// A leaf after legality checks, tied to its physical location.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolved {
    Const(bool),
    Ids {
        column: &'static str,
        ids: Vec<EntityId>,
        negated: bool,
    },
    Column {
        column: &'static str,
        operator: Operator,
        values: Vec<Value>,
    },
    Document {
        key: &'static str,
        operator: Operator,
        values: Vec<Value>,
    },
    GroupEntry {
        group: &'static str,
        entry: &'static str,
        values: Vec<Value>,
    },
    GroupKey {
        group: &'static str,
        values: Vec<Value>,
    },
}

pub(crate) fn resolve(schema: &KindSchema, cmp: &Comparison) -> CoreResult<Resolved> {
    let field = cmp.field();
    let operator = cmp.operator();
    let unsupported = || CoreError::unsupported_criterion(field.name(), operator);

    let (declared, mapping) = schema
        .searchable_field(field.name())
        .ok_or_else(unsupported)?;
    if declared != field {
        return Err(unsupported());
    }
    if operator.is_range() && !field.is_ordinal() {
        return Err(unsupported());
    }

    let values = cmp.values().to_vec();
    match mapping {
        FieldMapping::Identifier { column } => {
            let ids: Vec<EntityId> = values
                .iter()
                .filter_map(Value::as_text)
                .filter_map(EntityId::parse_safe)
                .collect();
            match operator {
                Operator::Eq | Operator::In if ids.is_empty() => Ok(Resolved::Const(false)),
                Operator::Eq | Operator::In => Ok(Resolved::Ids {
                    column,
                    ids,
                    negated: false,
                }),
                Operator::Ne if ids.is_empty() => Ok(Resolved::Const(true)),
                Operator::Ne => Ok(Resolved::Ids {
                    column,
                    ids,
                    negated: true,
                }),
                Operator::Gt | Operator::Lt => Err(unsupported()),
            }
        }
        FieldMapping::Column { column } => Ok(Resolved::Column {
            column,
            operator,
            values,
        }),
        FieldMapping::Document { key } => Ok(Resolved::Document {
            key,
            operator,
            values,
        }),
        FieldMapping::GroupEntry { group, entry } => match operator {
            Operator::Eq | Operator::In => Ok(Resolved::GroupEntry {
                group,
                entry,
                values,
            }),
            _ => Err(unsupported()),
        },
        FieldMapping::GroupKey { group } => match operator {
            Operator::Eq | Operator::In => Ok(Resolved::GroupKey { group, values }),
            _ => Err(unsupported()),
        },
    }
}

/// Applies a comparison to a stored value.
///
/// Absent and null values never match, under any operator.
pub(crate) fn compare_values(actual: Option<&Value>, operator: Operator, literals: &[Value]) -> bool {
    let Some(actual) = actual.filter(|v| !v.is_null()) else {
        return false;
    };
    match operator {
        Operator::Eq | Operator::In => literals.iter().any(|l| l == actual),
        Operator::Ne => literals.iter().all(|l| l != actual),
        Operator::Gt => range_matches(actual, literals, Ordering::Greater),
        Operator::Lt => range_matches(actual, literals, Ordering::Less),
    }
}

fn range_matches(actual: &Value, literals: &[Value], wanted: Ordering) -> bool {
    literals
        .first()
        .and_then(|l| actual.partial_cmp_same_type(l))
        == Some(wanted)
}

/// Applies an identifier match to a stored id.
pub(crate) fn ids_match(actual: Option<EntityId>, ids: &[EntityId], negated: bool) -> bool {
    match actual {
        Some(id) => ids.contains(&id) != negated,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::SearchableField;

    const ID: SearchableField = SearchableField::string("id");
    const NAME: SearchableField = SearchableField::string("name");
    const AGE: SearchableField = SearchableField::number("age").ordinal();
    const TAG: SearchableField = SearchableField::string("tag");

    fn schema() -> KindSchema {
        KindSchema::new("sample")
            .searchable(ID, FieldMapping::Identifier { column: "id" })
            .searchable(NAME, FieldMapping::Column { column: "name" })
            .searchable(AGE, FieldMapping::Document { key: "age" })
            .searchable(TAG, FieldMapping::GroupKey { group: "tags" })
    }

    fn leaf(c: &Criteria) -> &Comparison {
        c.comparisons()[0]
    }

    #[test]
    fn malformed_identifier_never_matches() {
        for literal in ["%", "*", "not-an-id", ""] {
            let c = Criteria::compare(ID, Operator::Eq, [literal]).unwrap();
            assert_eq!(resolve(&schema(), leaf(&c)).unwrap(), Resolved::Const(false));

            let c = Criteria::compare(ID, Operator::Ne, [literal]).unwrap();
            assert_eq!(resolve(&schema(), leaf(&c)).unwrap(), Resolved::Const(true));
        }
    }

    #[test]
    fn in_keeps_only_valid_identifiers() {
        let id = EntityId::new();
        let c = Criteria::compare(ID, Operator::In, [id.to_string(), "bogus".into()]).unwrap();
        assert_eq!(
            resolve(&schema(), leaf(&c)).unwrap(),
            Resolved::Ids {
                column: "id",
                ids: vec![id],
                negated: false
            }
        );
    }

    #[test]
    fn unknown_field_is_unsupported() {
        let other = SearchableField::string("other");
        let c = Criteria::compare(other, Operator::Eq, ["x"]).unwrap();
        assert!(matches!(
            resolve(&schema(), leaf(&c)),
            Err(CoreError::UnsupportedCriterion { .. })
        ));
    }

    #[test]
    fn joins_reject_negation() {
        let c = Criteria::compare(TAG, Operator::Ne, ["x"]).unwrap();
        let err = resolve(&schema(), leaf(&c)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "criterion not supported: field 'tag' with operator NE"
        );
    }

    #[test]
    fn compare_values_semantics() {
        let five = Value::from(5);
        assert!(compare_values(Some(&five), Operator::Gt, &[Value::from(4)]));
        assert!(!compare_values(Some(&five), Operator::Gt, &[Value::from(5)]));
        assert!(compare_values(Some(&five), Operator::Lt, &[Value::from(6)]));
        assert!(compare_values(Some(&five), Operator::Ne, &[Value::from(6)]));
        assert!(compare_values(
            Some(&five),
            Operator::In,
            &[Value::from(1), Value::from(5)]
        ));
        assert!(!compare_values(None, Operator::Ne, &[Value::from(6)]));
        assert!(!compare_values(Some(&Value::Null), Operator::Eq, &[Value::Null]));
    }
}
