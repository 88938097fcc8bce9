use thiserror::Error;

use crate::model::{ConstraintOp, Id, TypeTag};

/// Errors raised by the checkout and merge engines.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("branch '{0}' does not exist")]
    BranchNotFound(String),

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("object type '{0}' is not registered")]
    UnknownType(TypeTag),

    #[error("{0} '{1}' does not exist")]
    ObjectNotFound(TypeTag, Id),

    #[error("invalid type tag '{0}': expected '<app>.<model>'")]
    InvalidTypeTag(String),

    #[error("invalid snapshot for {tag} '{id}': {reason}")]
    InvalidSnapshot {
        tag: TypeTag,
        id: Id,
        reason: String,
    },

    #[error("staged change {0} has no object id")]
    MissingObjectId(i64),
}

/// Errors raised by the object-permission evaluator. These are configuration
/// errors and must surface to the caller; downgrading them to an allow or a
/// deny would hide a broken permission.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("invalid permission name '{0}': expected '<app>.<action>_<model>'")]
    InvalidName(String),

    #[error("invalid constraint on permission '{name}': {reason}")]
    InvalidConstraint { name: String, reason: String },

    #[error("unknown attribute '{attr}' for {tag}")]
    UnknownAttribute { tag: TypeTag, attr: String },

    #[error("operator '{op}' cannot be applied to '{attr}': {reason}")]
    InvalidOperand {
        op: ConstraintOp,
        attr: String,
        reason: String,
    },
}
