//! Cron scheduling for workflow triggers.
//!
//! This crate provides:
//!
//! - **Schedules**: cron parsing with timezone support and a minimum interval
//! - **Validation**: schedule checks merged into workflow validation
//! - **Scheduler**: registry writes and reconciliation against workflow state
//! - **Ticker**: turns due registrations into queued jobs

pub mod error;
pub mod manager;
pub mod reconcile;
pub mod schedule;
pub mod ticker;
pub mod validation;

pub use error::{ScheduleError, SchedulerError};
pub use manager::{CronScheduler, CronTrigger, ReconcileResult, SyncResult};
pub use reconcile::{ReconcilePlan, cron_job_id, workflow_prefix};
pub use schedule::{
    CronSchedule, CronValidation, DEFAULT_MIN_INTERVAL, check_cron_expression,
    validate_cron_expression, validate_cron_expression_with,
};
pub use ticker::{CronTicker, DEFAULT_TICK_INTERVAL, TickSummary};
pub use validation::{schedule_errors, validate_graph, validate_workflow};
