//! Command implementations.

pub mod backup;
pub mod completions;
pub mod enqueue;
pub mod restore;
pub mod run;
pub mod status;
pub mod sync;
