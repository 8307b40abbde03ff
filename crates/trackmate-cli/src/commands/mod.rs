//! Command implementations.

pub mod scan;
pub mod watch;
