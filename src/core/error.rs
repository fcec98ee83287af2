use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaiError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("Manifest error: {0}")]
    ManifestError(String),
    #[error("Path error: {0}")]
    PathError(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Collaborator failure: {0}")]
    CollaboratorFailure(String),
    #[error("Clipboard error: {0}")]
    ClipboardError(String),
}
