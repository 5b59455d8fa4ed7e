//! Job processing for the chainflow platform.
//!
//! [`EventProcessor`] runs a [`chainflow_queue::TriggerJob`] through the
//! workflow engine at most once per execution id and records the outcome in
//! an [`ExecutionStore`]. [`Worker`] feeds it from the job queue.

pub mod error;
pub mod processor;
pub mod record;
pub mod store;
pub mod testing;
pub mod worker;

pub use error::{ProcessorError, StoreError};
pub use processor::{DEFAULT_LEASE, EventProcessor, ProcessOutcome, SkipReason};
pub use record::{Completion, ExecutionRecord, ExecutionStatus, ParseStatusError};
pub use store::{ExecutionStore, InsertOutcome};
pub use worker::{Disposition, QueuedJob, Worker, WorkerConfig};
