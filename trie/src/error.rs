use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrieError {
    /// Malformed node or proof bytes.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The underlying engine failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Commit batch for version {0} is already committed or closed")]
    AlreadyCommitted(u64),

    /// A referenced node is absent: corruption, or a read below the prune floor.
    #[error("Node not found: {0}")]
    MissingNode(String),

    #[error("Version {version} must be greater than the latest version {latest}")]
    InvalidVersion { version: u64, latest: u64 },
}

pub type Result<T> = std::result::Result<T, TrieError>;

impl From<Box<dyn ruc::RucError>> for TrieError {
    fn from(e: Box<dyn ruc::RucError>) -> Self {
        TrieError::Store(format!("{}", e))
    }
}

impl From<serde_json::Error> for TrieError {
    fn from(e: serde_json::Error) -> Self {
        TrieError::Codec(e.to_string())
    }
}
