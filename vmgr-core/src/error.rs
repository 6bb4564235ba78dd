use thiserror::Error;

pub type Result<T> = std::result::Result<T, VmgrError>;

#[derive(Error, Debug)]
pub enum VmgrError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
