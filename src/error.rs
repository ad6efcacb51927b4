use thiserror::Error;

/// A browser action that could not be carried out. Absorbed into the command
/// history; never aborts the loop.
#[derive(Debug, Clone, Error)]
#[error("{action} on `{target}` failed: {message}")]
pub struct ExecutionError {
    pub action: &'static str,
    pub target: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(action: &'static str, target: impl Into<String>, message: impl ToString) -> Self {
        Self {
            action,
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn element_not_found(action: &'static str, element_id: &str) -> Self {
        Self::new(
            action,
            element_id,
            "element not found in the current world model",
        )
    }
}

/// Errors that terminate the current command.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model-service failure or schema violation during intent mapping or
    /// planning. Not retried beyond the planner's single repair attempt.
    #[error("planning failed: {0}")]
    Planning(String),

    /// Session-provider failure (create/get/end/debug).
    #[error("session provider error: {0}")]
    Session(String),
}

impl AgentError {
    pub fn planning(message: impl ToString) -> Self {
        Self::Planning(message.to_string())
    }

    pub fn session(message: impl ToString) -> Self {
        Self::Session(message.to_string())
    }
}

impl From<crate::model::ModelError> for AgentError {
    fn from(err: crate::model::ModelError) -> Self {
        Self::Planning(err.to_string())
    }
}
