//! Domain types for Tasky
//!
//! The notification core only consumes tasks; it never creates or persists
//! them. Storage belongs to the host application.

pub mod task;

pub use task::{DUE_FORMAT, Task, TaskId};
