//! Compiler for the relational engine.
//!
//! Produces an [`SqlPredicate`] tree. Column fields become column
//! comparisons, side-document fields become structured extractions
//! (`metadata->'key'`), and group-backed fields become existence joins over
//! the group's child rows. The tree renders as SQL-like text for logs and
//! tests.

use super::{resolve, CriteriaCompiler, Resolved};
use crate::criteria::{Criteria, Node, Operator};
use crate::entity::EntityId;
use crate::error::CoreResult;
use crate::schema::KindSchema;
use realmstore_codec::Value;
use std::fmt;

/// Compiles criteria into [`SqlPredicate`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelationalCompiler;

impl CriteriaCompiler for RelationalCompiler {
    type Query = SqlPredicate;

    fn compile(&self, schema: &KindSchema, criteria: &Criteria) -> CoreResult<SqlPredicate> {
        let predicate = compile_node(schema, criteria)?;
        tracing::trace!(kind = schema.name(), %criteria, sql = %predicate, "compiled criteria");
        Ok(predicate)
    }
}

fn compile_node(schema: &KindSchema, criteria: &Criteria) -> CoreResult<SqlPredicate> {
    Ok(match criteria.node() {
        Node::Compare(cmp) => match resolve(schema, cmp)? {
            Resolved::Const(b) => SqlPredicate::Const(b),
            Resolved::Ids {
                column,
                ids,
                negated,
            } => SqlPredicate::IdMatch {
                column: column.to_string(),
                ids,
                negated,
            },
            Resolved::Column {
                column,
                operator,
                values,
            } => SqlPredicate::Compare {
                operand: Operand::Column(column.to_string()),
                operator,
                values,
            },
            Resolved::Document {
                key,
                operator,
                values,
            } => SqlPredicate::Compare {
                operand: Operand::Document(key.to_string()),
                operator,
                values,
            },
            Resolved::GroupEntry {
                group,
                entry,
                values,
            } => SqlPredicate::Exists {
                group: group.to_string(),
                on: JoinCondition::Entry {
                    name: entry.to_string(),
                    values,
                },
            },
            Resolved::GroupKey { group, values } => SqlPredicate::Exists {
                group: group.to_string(),
                on: JoinCondition::Key(values),
            },
        },
        Node::And(children) => SqlPredicate::And(
            children
                .iter()
                .map(|c| compile_node(schema, c))
                .collect::<CoreResult<_>>()?,
        ),
        Node::Or(children) => SqlPredicate::Or(
            children
                .iter()
                .map(|c| compile_node(schema, c))
                .collect::<CoreResult<_>>()?,
        ),
        Node::Not(child) => SqlPredicate::Not(Box::new(compile_node(schema, child)?)),
    })
}

/// Left-hand side of a column comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A dedicated column.
    Column(String),
    /// A key extracted from the side-document.
    Document(String),
}

/// Condition on the child rows of a deferred group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinCondition {
    /// A child row whose name is one of the literals.
    Key(Vec<Value>),
    /// A child row with the given name whose value is one of the literals.
    Entry {
        /// Entry name.
        name: String,
        /// Accepted values.
        values: Vec<Value>,
    },
}

/// A compiled relational predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlPredicate {
    /// Constant truth value.
    Const(bool),
    /// Native-key match on an identifier column.
    IdMatch {
        /// Column name.
        column: String,
        /// Keys to match.
        ids: Vec<EntityId>,
        /// Whether the match is negated (`NE`).
        negated: bool,
    },
    /// Comparison of a column or side-document key with literals.
    Compare {
        /// What is compared.
        operand: Operand,
        /// Operator.
        operator: Operator,
        /// Literals.
        values: Vec<Value>,
    },
    /// Existence of a matching child row in a deferred group.
    Exists {
        /// Group (child table) name.
        group: String,
        /// Child row condition.
        on: JoinCondition,
    },
    /// Conjunction.
    And(Vec<SqlPredicate>),
    /// Disjunction.
    Or(Vec<SqlPredicate>),
    /// Negation.
    Not(Box<SqlPredicate>),
}

impl SqlPredicate {
    /// Returns true if evaluation needs the side-document.
    #[must_use]
    pub fn reads_document(&self) -> bool {
        match self {
            SqlPredicate::Compare {
                operand: Operand::Document(_),
                ..
            } => true,
            SqlPredicate::And(c) | SqlPredicate::Or(c) => c.iter().any(Self::reads_document),
            SqlPredicate::Not(c) => c.reads_document(),
            _ => false,
        }
    }
}

impl fmt::Display for SqlPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlPredicate::Const(true) => f.write_str("TRUE"),
            SqlPredicate::Const(false) => f.write_str("FALSE"),
            SqlPredicate::IdMatch {
                column,
                ids,
                negated,
            } => {
                let quoted: Vec<String> = ids.iter().map(|id| format!("'{id}'")).collect();
                match (ids.len(), negated) {
                    (1, false) => write!(f, "{column} = {}", quoted[0]),
                    (1, true) => write!(f, "{column} <> {}", quoted[0]),
                    (_, false) => write!(f, "{column} IN ({})", quoted.join(", ")),
                    (_, true) => write!(f, "{column} NOT IN ({})", quoted.join(", ")),
                }
            }
            SqlPredicate::Compare {
                operand,
                operator,
                values,
            } => {
                match operand {
                    Operand::Column(c) => f.write_str(c)?,
                    Operand::Document(k) => write!(f, "metadata->'{k}'")?,
                }
                write_comparison(f, *operator, values)
            }
            SqlPredicate::Exists { group, on } => {
                write!(
                    f,
                    "EXISTS (SELECT 1 FROM {group} g WHERE g.parent_id = id AND "
                )?;
                match on {
                    JoinCondition::Key(values) => {
                        f.write_str("g.name")?;
                        write_comparison(f, Operator::In, values)?;
                    }
                    JoinCondition::Entry { name, values } => {
                        write!(f, "g.name = '{name}' AND g.value")?;
                        write_comparison(f, Operator::In, values)?;
                    }
                }
                f.write_str(")")
            }
            SqlPredicate::And(c) if c.is_empty() => f.write_str("TRUE"),
            SqlPredicate::Or(c) if c.is_empty() => f.write_str("FALSE"),
            SqlPredicate::And(c) => write_joined(f, c, " AND "),
            SqlPredicate::Or(c) => write_joined(f, c, " OR "),
            SqlPredicate::Not(c) => write!(f, "NOT ({c})"),
        }
    }
}

fn write_comparison(f: &mut fmt::Formatter<'_>, operator: Operator, values: &[Value]) -> fmt::Result {
    match (operator, values) {
        (Operator::In, [single]) | (Operator::Eq, [single]) => write!(f, " = {single}"),
        (Operator::In, many) => {
            f.write_str(" IN (")?;
            for (i, v) in many.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{v}")?;
            }
            f.write_str(")")
        }
        (Operator::Ne, [v, ..]) => write!(f, " <> {v}"),
        (Operator::Gt, [v, ..]) => write!(f, " > {v}"),
        (Operator::Lt, [v, ..]) => write!(f, " < {v}"),
        (_, _) => f.write_str(" IS NULL"),
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[SqlPredicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::SearchableField;
    use crate::error::CoreError;
    use crate::schema::FieldMapping;

    const ID: SearchableField = SearchableField::string("id");
    const USER_ID: SearchableField = SearchableField::string("user_id");
    const CLIENT_ID: SearchableField = SearchableField::string("client_id");
    const EXPIRATION: SearchableField = SearchableField::number("expiration").ordinal();
    const CORRESPONDING: SearchableField = SearchableField::string("corresponding_session_id");
    const CLIENT: SearchableField = SearchableField::string("client");

    fn schema() -> KindSchema {
        KindSchema::new("sample")
            .searchable(ID, FieldMapping::Identifier { column: "id" })
            .searchable(USER_ID, FieldMapping::Column { column: "user_id" })
            .searchable(CLIENT_ID, FieldMapping::Document { key: "client_id" })
            .searchable(EXPIRATION, FieldMapping::Column { column: "expiration" })
            .searchable(
                CORRESPONDING,
                FieldMapping::GroupEntry {
                    group: "notes",
                    entry: "correspondingSessionId",
                },
            )
            .searchable(
                CLIENT,
                FieldMapping::GroupKey {
                    group: "client_sessions",
                },
            )
    }

    fn compile(c: &Criteria) -> CoreResult<SqlPredicate> {
        RelationalCompiler.compile(&schema(), c)
    }

    #[test]
    fn document_field_compiles_to_extraction() {
        let c = Criteria::compare(CLIENT_ID, Operator::Eq, ["account"]).unwrap();
        let sql = compile(&c).unwrap();
        assert_eq!(sql.to_string(), "metadata->'client_id' = 'account'");
        assert!(sql.reads_document());
    }

    #[test]
    fn wildcard_identifier_compiles_to_false() {
        let c = Criteria::compare(ID, Operator::Eq, ["%"]).unwrap();
        assert_eq!(compile(&c).unwrap(), SqlPredicate::Const(false));
    }

    #[test]
    fn join_fields_compile_to_exists() {
        let c = Criteria::compare(CORRESPONDING, Operator::Eq, ["abc"]).unwrap();
        assert_eq!(
            compile(&c).unwrap().to_string(),
            "EXISTS (SELECT 1 FROM notes g WHERE g.parent_id = id AND \
             g.name = 'correspondingSessionId' AND g.value = 'abc')"
        );

        let c = Criteria::compare(CLIENT, Operator::In, ["a", "b"]).unwrap();
        assert_eq!(
            compile(&c).unwrap().to_string(),
            "EXISTS (SELECT 1 FROM client_sessions g WHERE g.parent_id = id AND \
             g.name IN ('a', 'b'))"
        );
    }

    #[test]
    fn composite_tree_renders() {
        let c = Criteria::and([
            Criteria::compare(USER_ID, Operator::Eq, ["u1"]).unwrap(),
            Criteria::not(Criteria::compare(EXPIRATION, Operator::Lt, [100]).unwrap()),
        ]);
        assert_eq!(
            compile(&c).unwrap().to_string(),
            "(user_id = 'u1' AND NOT (expiration < 100))"
        );
    }

    #[test]
    fn unsupported_leaf_fails_whole_tree() {
        let c = Criteria::or([
            Criteria::compare(USER_ID, Operator::Eq, ["u1"]).unwrap(),
            Criteria::compare(CLIENT, Operator::Ne, ["x"]).unwrap(),
        ]);
        assert!(matches!(
            compile(&c),
            Err(CoreError::UnsupportedCriterion { .. })
        ));
    }

    #[test]
    fn compilation_is_deterministic() {
        let c = Criteria::compare(USER_ID, Operator::In, ["b", "a"]).unwrap();
        assert_eq!(compile(&c).unwrap(), compile(&c).unwrap());
    }
}
