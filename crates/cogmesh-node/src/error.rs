//! Error types for cogmesh-node

use thiserror::Error;

use cogmesh_core::{CognitiveError, CollaboratorError, SyncError, TransportError};
use cogmesh_logging::LoggingError;

/// Errors from node setup, lifecycle, and module management
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup failed; the only process-fatal condition
    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Cognitive(#[from] CognitiveError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    /// Coordinator already started
    #[error("Coordinator already started")]
    AlreadyStarted,

    /// Coordinator not started
    #[error("Coordinator not started")]
    NotStarted,

    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {name} failed to initialize: {source}")]
    ModuleInit {
        name: String,
        source: CollaboratorError,
    },

    #[error("Module {name} failed: {source}")]
    ModuleFailed {
        name: String,
        source: CollaboratorError,
    },
}

impl From<toml::de::Error> for NodeError {
    fn from(err: toml::de::Error) -> Self {
        NodeError::Config(err.to_string())
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
