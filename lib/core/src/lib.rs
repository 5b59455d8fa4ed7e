//! Core domain types for the chainflow platform.
//!
//! Identifier types shared by every other chainflow crate.

pub mod id;

pub use id::{ExecutionId, ExecutionRecordId, ParseIdError, UserId, WorkflowId};
