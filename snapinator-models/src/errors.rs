use std::fmt;

pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

/// Dotted error codes reported by the command-line front end.
pub mod codes {
    pub const TASK_NOT_FOUND: &str = "snapinator.task.not_found";
    pub const TASK_NO_CHANGES: &str = "snapinator.task.no_changes";
    pub const CAPTURE_BUSY: &str = "snapinator.capture.busy";
    pub const CAPTURE_FAILED: &str = "snapinator.capture.failed";
    pub const DAEMON_RUNNING: &str = "snapinator.daemon.running";
    pub const SETTINGS_INVALID: &str = "snapinator.settings.invalid";
}

/// An error with a stable, machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    code: String,
    message: String,
}

impl RuntimeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Boxes the error for `?` in functions returning [`SendableError`].
    pub fn boxed(self) -> SendableError {
        Box::new(self)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_leads_with_the_code() {
        let err = RuntimeError::new(codes::TASK_NOT_FOUND, "no task with id abc");
        assert_eq!(err.to_string(), "snapinator.task.not_found: no task with id abc");
        assert_eq!(err.code(), codes::TASK_NOT_FOUND);
        assert_eq!(err.message(), "no task with id abc");
    }

    #[test]
    fn boxed_error_keeps_its_type() {
        let boxed = RuntimeError::new(codes::CAPTURE_BUSY, "busy").boxed();
        let inner = boxed.downcast_ref::<RuntimeError>().unwrap();
        assert_eq!(inner.code(), codes::CAPTURE_BUSY);
    }
}
