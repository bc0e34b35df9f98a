//! Built-in module implementations for Vermont.
//!
//! Each implementation registers itself at link time and is selected by a
//! module file through its id:
//!
//! | id                      | category  |
//! |-------------------------|-----------|
//! | `builtin.memory`        | resource  |
//! | `builtin.cpu`           | resource  |
//! | `builtin.constant`      | resource  |
//! | `builtin.reservation`   | resource  |
//! | `builtin.sum`           | resource  |
//! | `builtin.attributes`    | object    |
//! | `builtin.expression`    | object    |
//! | `builtin.logfile`       | object    |
//! | `builtin.keyvalue`      | logformat |
//!
//! A binary that wants these implementations available must call [`link`],
//! otherwise the linker is free to drop the registrations.

mod attributes;
mod expression;
mod keyvalue;
mod logfile;
mod resources;

pub use attributes::{AttributeSettings, Range};
pub use expression::{Check, ExpressionError, ExpressionRule};
pub use keyvalue::{KeyValueError, KeyValueFormat, KeyValueSettings};
pub use logfile::{LogFileRule, LogFileSettings};

/// Forces this crate into the final binary.
#[inline(never)]
pub fn link() {
    tracing::trace!(
        implementations = vermont_core::entries().len(),
        "Built-in modules linked"
    );
}
