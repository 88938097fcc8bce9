//! Change staging and object-level permissions for generic object stores.
//!
//! Two engines share one data model:
//!
//! - **Checkout / merge**: a [`logic::CheckoutSession`] captures creates,
//!   updates, and deletes against a branch instead of committing them; the
//!   coalesced queue persists as [`model::StagedChange`] rows, and
//!   [`logic::merge_branch`] later applies them to the live objects in
//!   order, atomically.
//! - **Restrict**: [`logic::restrict`] filters a collection of objects down
//!   to those a user holds an [`model::ObjectPermission`] for, evaluating
//!   declarative constraint expression trees per object.

pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use error::{PermissionError, StagingError};

// Export engine entry points
pub use logic::{
    checkout, merge_branch, restrict, restrict_type, CheckoutSession, EnforcementPolicy,
    MergeOutcome,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};
