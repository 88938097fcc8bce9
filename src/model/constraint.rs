use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::PermissionError;
use crate::model::{ObjectRecord, ObjectTypeDef};

/// Token in a constraint value that evaluates to the requesting actor's
/// username, e.g. `{"attr": "owner", "op": "eq", "value": "$user"}`.
pub const CONSTRAINT_TOKEN_USER: &str = "$user";

/// A boolean predicate tree limiting which object instances a permission
/// covers. Either a single field comparison or a logical combinator over a
/// list of child expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstraintExpr {
    /// Logical AND - all child expressions must match
    And { and: Vec<ConstraintExpr> },
    /// Logical OR - any child expression must match
    Or { or: Vec<ConstraintExpr> },
    /// A single field comparison
    Predicate(Predicate),
}

/// Leaf comparison: a dot-separated attribute path, an operator, and a
/// comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    pub attr: AttrPath,
    pub op: ConstraintOp,
    pub value: Value,
}

/// Dot-separated attribute path into an object's fields, e.g. `site.name`.
/// The first segment must be `id` or a field the type registry declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrPath(pub String);

impl AttrPath {
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of comparison operators a predicate may use. An unknown
/// operator fails deserialization, which surfaces as an invalid-permission
/// error rather than an allow or a deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintOp::Eq => "eq",
            ConstraintOp::Ne => "ne",
            ConstraintOp::Gt => "gt",
            ConstraintOp::Gte => "gte",
            ConstraintOp::Lt => "lt",
            ConstraintOp::Lte => "lte",
            ConstraintOp::In => "in",
            ConstraintOp::NotIn => "not_in",
            ConstraintOp::Contains => "contains",
        };
        f.write_str(s)
    }
}

impl ConstraintExpr {
    /// Evaluate this expression against one object record. `tokens` maps
    /// substitution tokens (e.g. `$user`) to their evaluation-time values.
    ///
    /// An attribute path whose first segment the type does not declare is a
    /// configuration error, never a silent non-match.
    pub fn matches(
        &self,
        record: &ObjectRecord,
        def: &ObjectTypeDef,
        tokens: &HashMap<String, Value>,
    ) -> Result<bool, PermissionError> {
        match self {
            ConstraintExpr::And { and } => {
                for expr in and {
                    if !expr.matches(record, def, tokens)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConstraintExpr::Or { or } => {
                for expr in or {
                    if expr.matches(record, def, tokens)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConstraintExpr::Predicate(predicate) => predicate.matches(record, def, tokens),
        }
    }
}

impl Predicate {
    fn matches(
        &self,
        record: &ObjectRecord,
        def: &ObjectTypeDef,
        tokens: &HashMap<String, Value>,
    ) -> Result<bool, PermissionError> {
        let extracted = resolve_attr(record, def, &self.attr)?;
        let value = replace_tokens(&self.value, tokens);

        match self.op {
            ConstraintOp::Eq => Ok(extracted.as_ref() == Some(&value)),
            ConstraintOp::Ne => Ok(extracted.as_ref() != Some(&value)),
            ConstraintOp::Gt => self.ordered(extracted.as_ref(), &value, |o| o == Ordering::Greater),
            ConstraintOp::Gte => self.ordered(extracted.as_ref(), &value, |o| o != Ordering::Less),
            ConstraintOp::Lt => self.ordered(extracted.as_ref(), &value, |o| o == Ordering::Less),
            ConstraintOp::Lte => self.ordered(extracted.as_ref(), &value, |o| o != Ordering::Greater),
            ConstraintOp::In => {
                let candidates = self.value_list(&value)?;
                Ok(extracted.map_or(false, |v| candidates.contains(&v)))
            }
            ConstraintOp::NotIn => {
                let candidates = self.value_list(&value)?;
                // A missing value is trivially not in the list
                Ok(extracted.map_or(true, |v| !candidates.contains(&v)))
            }
            ConstraintOp::Contains => {
                let Value::String(needle) = &value else {
                    return Err(self.invalid_operand("comparison value must be a string"));
                };
                match extracted {
                    Some(Value::String(s)) => Ok(s.contains(needle.as_str())),
                    Some(Value::Array(items)) => Ok(items.contains(&value)),
                    _ => Ok(false),
                }
            }
        }
    }

    /// Ordering comparison over two numbers or two strings. A constraint
    /// value of any other kind is malformed; a missing or mismatched object
    /// value is simply a non-match.
    fn ordered<F>(&self, left: Option<&Value>, right: &Value, check: F) -> Result<bool, PermissionError>
    where
        F: Fn(Ordering) -> bool,
    {
        if !matches!(right, Value::Number(_) | Value::String(_)) {
            return Err(self.invalid_operand("comparison value must be a number or string"));
        }
        let ordering = match (left, right) {
            (Some(Value::Number(l)), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
                (Some(lf), Some(rf)) => lf.partial_cmp(&rf),
                _ => None,
            },
            (Some(Value::String(l)), Value::String(r)) => Some(l.as_str().cmp(r.as_str())),
            _ => None,
        };
        Ok(ordering.map_or(false, check))
    }

    fn value_list(&self, value: &Value) -> Result<Vec<Value>, PermissionError> {
        match value {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(self.invalid_operand("comparison value must be a list")),
        }
    }

    fn invalid_operand(&self, reason: &str) -> PermissionError {
        PermissionError::InvalidOperand {
            op: self.op,
            attr: self.attr.0.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Resolve a dot-separated attribute path against a record. Returns `None`
/// when a declared field is absent or a nested segment does not resolve;
/// errors when the leading segment is not a queryable attribute of the type.
fn resolve_attr(
    record: &ObjectRecord,
    def: &ObjectTypeDef,
    attr: &AttrPath,
) -> Result<Option<Value>, PermissionError> {
    let mut segments = attr.segments();
    let first = segments.next().unwrap_or("");

    if first == "id" {
        return Ok(Some(Value::String(record.id.clone())));
    }
    if !def.has_field(first) {
        return Err(PermissionError::UnknownAttribute {
            tag: def.tag.clone(),
            attr: attr.0.clone(),
        });
    }

    let mut current = match record.field(first) {
        Some(value) => value.clone(),
        None => return Ok(None),
    };
    for segment in segments {
        match current {
            Value::Object(ref map) => match map.get(segment) {
                Some(value) => current = value.clone(),
                None => return Ok(None),
            },
            _ => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Substitute tokens (e.g. `$user`) in a constraint value, descending into
/// lists so `{"op": "in", "value": ["alice", "$user"]}` works.
fn replace_tokens(value: &Value, tokens: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => tokens.get(s).cloned().unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| replace_tokens(v, tokens)).collect()),
        _ => value.clone(),
    }
}
