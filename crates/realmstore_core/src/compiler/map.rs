//! Compiler for in-memory records.
//!
//! Produces a [`MapPredicate`] evaluated directly against fully
//! materialized [`EntityRecord`]s. The map engine executes these, and
//! storage transactions use them to overlay their own staged writes onto
//! query results from any engine.

use super::{compare_values, ids_match, resolve, CriteriaCompiler, Resolved};
use crate::criteria::{Criteria, Node, Operator};
use crate::entity::{EntityId, EntityRecord};
use crate::error::CoreResult;
use crate::schema::{KindSchema, ID_COLUMN};
use realmstore_codec::Value;

/// Compiles criteria into [`MapPredicate`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapCompiler;

impl CriteriaCompiler for MapCompiler {
    type Query = MapPredicate;

    fn compile(&self, schema: &KindSchema, criteria: &Criteria) -> CoreResult<MapPredicate> {
        compile_node(schema, criteria)
    }
}

fn compile_node(schema: &KindSchema, criteria: &Criteria) -> CoreResult<MapPredicate> {
    let compile_all = |children: &[Criteria]| -> CoreResult<Vec<MapPredicate>> {
        children.iter().map(|c| compile_node(schema, c)).collect()
    };
    Ok(match criteria.node() {
        Node::Compare(cmp) => match resolve(schema, cmp)? {
            Resolved::Const(b) => MapPredicate::Const(b),
            Resolved::Ids {
                column,
                ids,
                negated,
            } => MapPredicate::Ids {
                field: (column != ID_COLUMN).then(|| column.to_string()),
                ids,
                negated,
            },
            Resolved::Column {
                column: name,
                operator,
                values,
            }
            | Resolved::Document {
                key: name,
                operator,
                values,
            } => MapPredicate::Field {
                name: name.to_string(),
                operator,
                values,
            },
            Resolved::GroupEntry {
                group,
                entry,
                values,
            } => MapPredicate::GroupEntry {
                group: group.to_string(),
                entry: entry.to_string(),
                values,
            },
            Resolved::GroupKey { group, values } => MapPredicate::GroupKey {
                group: group.to_string(),
                values,
            },
        },
        Node::And(children) => MapPredicate::And(compile_all(children)?),
        Node::Or(children) => MapPredicate::Or(compile_all(children)?),
        Node::Not(child) => MapPredicate::Not(Box::new(compile_node(schema, child)?)),
    })
}

/// A predicate over in-memory records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapPredicate {
    /// Constant truth value.
    Const(bool),
    /// Identifier match. `field` is `None` for the entity id itself.
    Ids {
        /// Core field holding a related id, or `None` for the entity id.
        field: Option<String>,
        /// Ids to match.
        ids: Vec<EntityId>,
        /// Whether the match is negated.
        negated: bool,
    },
    /// Comparison of a core field with literals.
    Field {
        /// Core field name.
        name: String,
        /// Operator.
        operator: Operator,
        /// Literals.
        values: Vec<Value>,
    },
    /// A named group entry whose value is one of the literals.
    GroupEntry {
        /// Group name.
        group: String,
        /// Entry name.
        entry: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// A group containing an entry named by one of the literals.
    GroupKey {
        /// Group name.
        group: String,
        /// Accepted entry names.
        values: Vec<Value>,
    },
    /// Conjunction.
    And(Vec<MapPredicate>),
    /// Disjunction.
    Or(Vec<MapPredicate>),
    /// Negation.
    Not(Box<MapPredicate>),
}

impl MapPredicate {
    /// Evaluates the predicate against `record`.
    ///
    /// Group-backed leaves look at `record.groups`; a group that was never
    /// loaded behaves like an empty one.
    #[must_use]
    pub fn evaluate(&self, record: &EntityRecord) -> bool {
        match self {
            MapPredicate::Const(b) => *b,
            MapPredicate::Ids {
                field,
                ids,
                negated,
            } => {
                let actual = match field {
                    None => Some(record.id),
                    Some(name) => record
                        .field(name)
                        .and_then(Value::as_text)
                        .and_then(EntityId::parse_safe),
                };
                ids_match(actual, ids, *negated)
            }
            MapPredicate::Field {
                name,
                operator,
                values,
            } => compare_values(record.field(name), *operator, values),
            MapPredicate::GroupEntry {
                group,
                entry,
                values,
            } => compare_values(
                record.group(group).and_then(|g| g.get(entry)),
                Operator::In,
                values,
            ),
            MapPredicate::GroupKey { group, values } => record.group(group).is_some_and(|g| {
                values
                    .iter()
                    .filter_map(Value::as_text)
                    .any(|key| g.contains_key(key))
            }),
            MapPredicate::And(c) => c.iter().all(|p| p.evaluate(record)),
            MapPredicate::Or(c) => c.iter().any(|p| p.evaluate(record)),
            MapPredicate::Not(c) => !c.evaluate(record),
        }
    }

    /// Returns true if evaluation reads deferred groups.
    #[must_use]
    pub fn needs_groups(&self) -> bool {
        match self {
            MapPredicate::GroupEntry { .. } | MapPredicate::GroupKey { .. } => true,
            MapPredicate::And(c) | MapPredicate::Or(c) => c.iter().any(Self::needs_groups),
            MapPredicate::Not(c) => c.needs_groups(),
            _ => false,
        }
    }
}
