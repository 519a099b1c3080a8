use std::path::PathBuf;

use crate::host::EngineError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Filter list '{list_id}' unavailable: {reason}")]
    SourceUnavailable { list_id: String, reason: String },
    #[error("Compile failed for '{identifier}': {source}")]
    CompileFailure {
        identifier: String,
        #[source]
        source: EngineError,
    },
    #[error("Failed to persist '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode '{path}': {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid whitelist entry: '{0}'")]
    InvalidWhitelistInput(String),
    #[error("Invalid filter list URL: '{0}'")]
    InvalidFilterListUrl(String),
    #[error("Unknown filter list: '{0}'")]
    UnknownFilterList(String),
    #[error("Filter list already registered: '{0}'")]
    DuplicateFilterList(String),
    #[error("Built-in filter list '{0}' cannot be removed")]
    BuiltInListRemoval(String),
    #[error("No pending block decision with id {0}")]
    UnknownSession(uuid::Uuid),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Content blocker has shut down")]
    Shutdown,
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence { path: path.into(), source }
    }

    pub(crate) fn encoding(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Encoding { path: path.into(), source }
    }
}
