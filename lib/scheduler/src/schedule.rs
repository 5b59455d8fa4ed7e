//! Cron expression parsing, projection and validation.
//!
//! Five-field expressions are minute-level. Six-field expressions carry a
//! leading seconds field.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Shortest allowed gap between two runs of one schedule.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// A parsed cron schedule bound to a timezone.
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    cron: Cron,
}

impl CronSchedule {
    /// Parses `expression`, evaluated in `timezone` (UTC when absent).
    ///
    /// # Errors
    ///
    /// Returns an error if the expression or the timezone is invalid.
    pub fn parse(expression: &str, timezone: Option<&str>) -> Result<Self, ScheduleError> {
        let timezone = match timezone.map(str::trim).filter(|name| !name.is_empty()) {
            None => Tz::UTC,
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ScheduleError::InvalidTimezone {
                    timezone: name.to_string(),
                })?,
        };

        let cron = Cron::new(expression.trim())
            .with_seconds_optional()
            .parse()
            .map_err(|e| ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            timezone,
            cron,
        })
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First run strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.cron
            .find_next_occurrence(&local, false)
            .ok()
            .map(|next| next.with_timezone(&Utc))
    }

    /// Latest run in `(after, now]`, skipping any earlier missed runs.
    #[must_use]
    pub fn latest_due(&self, after: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut due = self.next_after(after).filter(|next| *next <= now)?;
        while let Some(next) = self.next_after(due).filter(|next| *next <= now) {
            due = next;
        }
        Some(due)
    }

    /// Rejects schedules whose first two runs after `from` are closer than
    /// `min_interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is below the floor or there are no
    /// two upcoming runs.
    pub fn check_interval(
        &self,
        from: DateTime<Utc>,
        min_interval: Duration,
    ) -> Result<(), ScheduleError> {
        let no_run = || ScheduleError::NoUpcomingRun {
            expression: self.expression.clone(),
        };
        let first = self.next_after(from).ok_or_else(no_run)?;
        let second = self.next_after(first).ok_or_else(no_run)?;

        let interval_secs = (second - first).num_seconds();
        if interval_secs < 0 || interval_secs.unsigned_abs() < min_interval.as_secs() {
            return Err(ScheduleError::IntervalTooShort {
                expression: self.expression.clone(),
                interval_secs,
                min_interval_secs: min_interval.as_secs(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expression", &self.expression)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

/// Outcome of validating a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CronValidation {
    fn from_result(result: Result<(), ScheduleError>) -> Self {
        match result {
            Ok(()) => Self {
                valid: true,
                error: None,
            },
            Err(e) => Self {
                valid: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Validates an expression in UTC against [`DEFAULT_MIN_INTERVAL`].
#[must_use]
pub fn validate_cron_expression(expression: &str) -> CronValidation {
    CronValidation::from_result(check_cron_expression(expression, None, DEFAULT_MIN_INTERVAL))
}

/// Validates an expression in a timezone against a custom floor.
#[must_use]
pub fn validate_cron_expression_with(
    expression: &str,
    timezone: Option<&str>,
    min_interval: Duration,
) -> CronValidation {
    CronValidation::from_result(check_cron_expression(expression, timezone, min_interval))
}

/// Parses and interval-checks an expression.
///
/// # Errors
///
/// Returns the first problem found.
pub fn check_cron_expression(
    expression: &str,
    timezone: Option<&str>,
    min_interval: Duration,
) -> Result<(), ScheduleError> {
    CronSchedule::parse(expression, timezone)?.check_interval(Utc::now(), min_interval)
}
