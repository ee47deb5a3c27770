//! Error types for sessionmon-core

use thiserror::Error;

/// Main error type for the sessionmon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// File notification backend error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A tool call could not be located in its source file
    #[error("tool {tool} with UUID {uuid} not found")]
    ToolNotFound { tool: String, uuid: String },

    /// The watch loop was started outside a tokio runtime
    #[error("runtime error: {0}")]
    Runtime(String),

    /// devagent subprocess or output error
    #[error("devagent error: {0}")]
    Devagent(String),
}

/// Result type alias for sessionmon-core
pub type Result<T> = std::result::Result<T, Error>;
