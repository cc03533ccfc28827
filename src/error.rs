use thiserror::Error;

/// The crate's unified error type.
///
/// Ingestion failures are fatal and propagate through `?`; everything
/// downstream of a populated store (search, graph, capsule building)
/// is designed to degrade gracefully instead of returning an error —
/// see the `UnknownModel`/`FtsFailure` handling in `search` and
/// `capsule`, which recover locally rather than raise one of these.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("manifest not found at {0}")]
    MissingArtifact(String),

    #[error("failed to parse {path}: {reason}")]
    CorruptArtifact { path: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
