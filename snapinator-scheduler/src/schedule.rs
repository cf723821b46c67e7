//! Cron expression evaluation.
//!
//! Five fields (minute hour day-of-month month day-of-week) or six with a
//! leading seconds field. Day-of-month and day-of-week are OR-combined when
//! both are restricted, as in Vixie cron.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use croner::Cron;

use crate::errors::ScheduleError;

/// Occurrences further out than this are treated as "never".
const HORIZON_SECONDS: i64 = 4 * 366 * 24 * 60 * 60;

pub struct CronSchedule {
    expression: String,
    cron: Cron,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ScheduleError::Empty);
        }

        // `@hourly` and friends are handed to croner untouched.
        if !expression.starts_with('@') {
            let fields: Vec<&str> = expression.split_whitespace().collect();
            if !(5..=6).contains(&fields.len()) {
                return Err(ScheduleError::FieldCount {
                    expression: expression.to_string(),
                    found: fields.len(),
                });
            }
            for field in fields {
                check_steps(expression, field)?;
            }
        }

        let cron = Cron::new(expression)
            .with_seconds_optional()
            .parse()
            .map_err(|err| ScheduleError::Invalid {
                expression: expression.to_string(),
                reason: err.to_string(),
            })?;

        let schedule = CronSchedule {
            expression: expression.to_string(),
            cron,
        };
        // Reject expressions that can never fire (e.g. Feb 30) up front.
        schedule.next_trigger(&Utc::now())?;
        Ok(schedule)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Smallest matching instant strictly after `after`.
    pub fn next_trigger<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Result<DateTime<Tz>, ScheduleError> {
        let next = self
            .cron
            .find_next_occurrence(after, false)
            .map_err(|_| self.no_upcoming())?;
        if next.timestamp() - after.timestamp() > HORIZON_SECONDS {
            return Err(self.no_upcoming());
        }
        Ok(next)
    }

    /// The next `count` trigger instants after `after`.
    pub fn upcoming<Tz: TimeZone>(
        &self,
        after: &DateTime<Tz>,
        count: usize,
    ) -> Result<Vec<DateTime<Tz>>, ScheduleError> {
        let mut instants = Vec::with_capacity(count);
        let mut cursor = after.clone();
        for _ in 0..count {
            cursor = self.next_trigger(&cursor)?;
            instants.push(cursor.clone());
        }
        Ok(instants)
    }

    fn no_upcoming(&self) -> ScheduleError {
        ScheduleError::NoUpcomingTrigger {
            expression: self.expression.clone(),
        }
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Every `/n` in a field must carry a positive integer step.
fn check_steps(expression: &str, field: &str) -> Result<(), ScheduleError> {
    for part in field.split(',') {
        if let Some((_, step)) = part.split_once('/') {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(ScheduleError::InvalidStep {
                        expression: expression.to_string(),
                        field: field.to_string(),
                    })
                }
            }
        }
    }
    Ok(())
}
