pub mod branch;
pub mod common;
pub mod constraint;
pub mod object;
pub mod permission;
pub mod registry;
pub mod staging;
pub mod user_context;

pub use branch::*;
pub use common::*;
pub use constraint::*;
pub use object::*;
pub use permission::*;
pub use registry::*;
pub use staging::*;
pub use user_context::*;
