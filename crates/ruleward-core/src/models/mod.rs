//! Data models for Ruleward

pub mod alert;
pub mod exception;
pub mod result;
pub mod rule;
pub mod tuple;

pub use alert::*;
pub use exception::*;
pub use result::*;
pub use rule::*;
pub use tuple::*;
