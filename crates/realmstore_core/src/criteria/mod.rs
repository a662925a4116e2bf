//! Backend-independent predicate trees.
//!
//! A [`Criteria`] is an immutable tree whose leaves compare one searchable
//! field against literal values and whose inner nodes are `AND`, `OR` and
//! `NOT`. Combinators never modify their inputs: they return a new tree
//! sharing the existing subtrees, so every previously built criteria stays
//! valid.
//!
//! Literal types and operator arity are checked when a leaf is built, before
//! any backend is involved. Whether a backend can express a given
//! field/operator combination is decided later by its compiler.
//!
//! ```rust,ignore
//! let active = Criteria::compare(user_session::REALM_ID, Operator::Eq, ["master"])?;
//! let expired = Criteria::compare(user_session::EXPIRATION, Operator::Lt, [now])?;
//! let query = Criteria::and([active, Criteria::not(expired)]);
//! ```

mod field;

pub use field::{FieldType, SearchableField};

use crate::error::{CoreError, CoreResult};
use realmstore_codec::Value;
use std::fmt;
use std::sync::Arc;

/// Comparison operator of a criteria leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal to the single literal.
    Eq,
    /// Not equal to the single literal.
    Ne,
    /// Greater than the single literal. Ordinal fields only.
    Gt,
    /// Less than the single literal. Ordinal fields only.
    Lt,
    /// Equal to any of one or more literals.
    In,
}

impl Operator {
    /// Returns true for `GT` and `LT`.
    #[must_use]
    pub const fn is_range(self) -> bool {
        matches!(self, Operator::Gt | Operator::Lt)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Eq => "EQ",
            Operator::Ne => "NE",
            Operator::Gt => "GT",
            Operator::Lt => "LT",
            Operator::In => "IN",
        };
        f.write_str(name)
    }
}

/// A leaf comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    field: SearchableField,
    operator: Operator,
    values: Vec<Value>,
}

impl Comparison {
    /// The compared field.
    #[must_use]
    pub fn field(&self) -> SearchableField {
        self.field
    }

    /// The operator.
    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The literals. Exactly one unless the operator is `IN`.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A node of a criteria tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Field comparison.
    Compare(Comparison),
    /// Conjunction. Empty means true.
    And(Vec<Criteria>),
    /// Disjunction. Empty means false.
    Or(Vec<Criteria>),
    /// Negation.
    Not(Criteria),
}

/// An immutable, cheaply cloneable predicate tree.
#[derive(Clone, PartialEq, Eq)]
pub struct Criteria(Arc<Node>);

impl Criteria {
    /// Builds a leaf comparing `field` with `values`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TypeMismatch`] if a literal does not match the field's
    ///   type, or the number of literals does not fit the operator.
    /// - [`CoreError::UnsupportedCriterion`] for `GT`/`LT` on a field that
    ///   is not ordinal.
    pub fn compare<I, V>(field: SearchableField, operator: Operator, values: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();

        match (operator, values.len()) {
            (Operator::In, 0) => {
                return Err(CoreError::type_mismatch(
                    field.name(),
                    "at least one value",
                    "none",
                ))
            }
            (Operator::In, _) | (_, 1) => {}
            (_, n) => {
                return Err(CoreError::type_mismatch(
                    field.name(),
                    "exactly one value",
                    format!("{n} values"),
                ))
            }
        }

        if let Some(bad) = values.iter().find(|v| !field.field_type().accepts(v)) {
            return Err(CoreError::type_mismatch(
                field.name(),
                field.field_type().to_string(),
                bad.value_type().to_string(),
            ));
        }

        if operator.is_range() && !field.is_ordinal() {
            return Err(CoreError::unsupported_criterion(field.name(), operator));
        }

        Ok(Self(Arc::new(Node::Compare(Comparison {
            field,
            operator,
            values,
        }))))
    }

    /// Conjunction of `children`. No children yields the always-true tree.
    pub fn and(children: impl IntoIterator<Item = Criteria>) -> Self {
        Self(Arc::new(Node::And(children.into_iter().collect())))
    }

    /// Disjunction of `children`. No children yields the always-false tree.
    pub fn or(children: impl IntoIterator<Item = Criteria>) -> Self {
        Self(Arc::new(Node::Or(children.into_iter().collect())))
    }

    /// Negation of `child`.
    #[must_use]
    pub fn not(child: Criteria) -> Self {
        Self(Arc::new(Node::Not(child)))
    }

    /// Matches every entity.
    #[must_use]
    pub fn all() -> Self {
        Self::and([])
    }

    /// Matches no entity.
    #[must_use]
    pub fn none() -> Self {
        Self::or([])
    }

    /// Returns the root node.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.0
    }

    /// Every comparison in the tree, depth first.
    #[must_use]
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<&'a Comparison>) {
        match self.node() {
            Node::Compare(c) => out.push(c),
            Node::And(children) | Node::Or(children) => {
                for child in children {
                    child.collect_comparisons(out);
                }
            }
            Node::Not(child) => child.collect_comparisons(out),
        }
    }
}

impl fmt::Debug for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Criteria({self})")
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Compare(c) => {
                write!(f, "{} {} ", c.field, c.operator)?;
                if c.operator == Operator::In {
                    write_list(f, &c.values)
                } else {
                    write!(f, "{}", c.values[0])
                }
            }
            Node::And(children) if children.is_empty() => f.write_str("TRUE"),
            Node::Or(children) if children.is_empty() => f.write_str("FALSE"),
            Node::And(children) => write_joined(f, children, " AND "),
            Node::Or(children) => write_joined(f, children, " OR "),
            Node::Not(child) => write!(f, "NOT ({child})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    f.write_str("(")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    f.write_str(")")
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Criteria], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}
