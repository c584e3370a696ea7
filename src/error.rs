// Error types for the data service boundary and the task store

use thiserror::Error;

/// Failure reported by a [`DataService`](crate::service::DataService)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("{0}")]
    Backend(String),
}

impl ServiceError {
    /// Flatten an eyre report, cause chain included
    pub fn backend(err: eyre::Report) -> Self {
        ServiceError::Backend(format!("{:#}", err))
    }
}

/// Which write a [`TodoError::Write`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Add,
    Update,
    Delete,
    Reorder,
}

impl WriteAction {
    fn describe(self) -> &'static str {
        match self {
            WriteAction::Add => "adding task",
            WriteAction::Update => "updating task",
            WriteAction::Delete => "deleting task",
            WriteAction::Reorder => "reordering tasks",
        }
    }
}

impl std::fmt::Display for WriteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// User-facing failure of a task store operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TodoError {
    #[error("Error loading tasks: {0}")]
    Fetch(String),

    #[error("Error {action}: {message}")]
    Write { action: WriteAction, message: String },

    #[error("Error subscribing to changes: {0}")]
    Subscription(String),
}

impl TodoError {
    pub fn fetch(err: ServiceError) -> Self {
        TodoError::Fetch(err.to_string())
    }

    pub fn write(action: WriteAction, err: ServiceError) -> Self {
        TodoError::Write {
            action,
            message: err.to_string(),
        }
    }

    pub fn subscription(err: ServiceError) -> Self {
        TodoError::Subscription(err.to_string())
    }
}
