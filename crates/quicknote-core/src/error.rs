use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A backend get/set/delete failed, or a stored value could not be decoded.
    #[error("storage fault: {0}")]
    StorageFault(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The broadcast primitive is not available in this execution environment.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::StorageFault(format!("failed to decode stored value: {}", e))
    }
}
