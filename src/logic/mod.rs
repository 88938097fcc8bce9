pub mod checkout;
pub mod merge;
pub mod permissions;
pub mod restrict;

pub use checkout::*;
pub use merge::*;
pub use permissions::*;
pub use restrict::*;
