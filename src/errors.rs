use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("no such client: {0}")]
    NoSuchClient(String),

    #[error("client already exists: {0}")]
    ClientAlreadyExists(String),

    #[error("repository is locked by process {0}")]
    LockHeld(u32),

    #[error("register is corrupt: {0}")]
    CorruptRegister(String),

    #[error("store object is corrupt: {0}")]
    CorruptObject(String),

    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("backup aborted")]
    WalkAborted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("repository not found at {0}")]
    RepositoryNotFound(String),
}

impl From<std::io::Error> for RepoError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;
