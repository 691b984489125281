use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("failed to load query documents from {path}: {message}")]
    Documents { path: PathBuf, message: String },
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn documents(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Documents {
            path: path.into(),
            message: message.into(),
        }
    }
}
