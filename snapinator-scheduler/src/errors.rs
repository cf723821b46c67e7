use snapinator_config::ConfigError;
use thiserror::Error;

/// A cron expression that cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("cron expression is empty")]
    Empty,

    #[error("cron expression '{expression}' has {found} fields; expected 5 or 6")]
    FieldCount { expression: String, found: usize },

    #[error("invalid step '{field}' in cron expression '{expression}'")]
    InvalidStep { expression: String, field: String },

    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },

    #[error("cron expression '{expression}' has no occurrence within the next four years")]
    NoUpcomingTrigger { expression: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("viewport must be positive, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("task {id} not found")]
    NotFound { id: String },

    #[error("unable to persist task list: {0}")]
    Persistence(#[from] ConfigError),
}

/// Why a manual capture request was not dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("task {task_id} is already being captured")]
    Busy { task_id: String },

    #[error("capture workers are no longer running")]
    Closed,
}
