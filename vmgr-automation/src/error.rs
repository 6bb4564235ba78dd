use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutomationError>;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("stack already exists: {0}")]
    StackAlreadyExists(String),

    #[error("stack not found: {0}")]
    StackNotFound(String),

    #[error("failed to install plugin {name} {version}: {reason}")]
    PluginInstall {
        name: String,
        version: String,
        reason: String,
    },

    #[error("failed to resolve caller identity: {0}")]
    Identity(String),

    #[error("failed to set config '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("apply failed for stack {stack}: {reason}")]
    Apply { stack: String, reason: String },

    #[error("destroy failed for stack {stack}: {reason}")]
    Destroy { stack: String, reason: String },

    #[error("engine error: {0}")]
    Engine(String),
}

impl AutomationError {
    /// True when a create collided with an existing stack.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AutomationError::StackAlreadyExists(_))
    }

    /// True when the addressed stack does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AutomationError::StackNotFound(_))
    }
}
