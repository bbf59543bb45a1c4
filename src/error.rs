//! Error taxonomy shared by every project operation.
//!
//! One `thiserror` enum for the whole crate; external tool failures, parse
//! failures and lifecycle precondition failures all surface through it.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for project operations
#[derive(Error, Debug)]
pub enum ProjectError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The project directory exists and overwriting was not allowed
    #[error("Project already exists at {path}; load its snapshot or pass overwrite")]
    AlreadyExists { path: PathBuf },

    /// A snapshot file could not be decoded
    #[error("Corrupt snapshot {path}: {message}")]
    CorruptSnapshot { path: PathBuf, message: String },

    /// No parser is registered under the requested schema name
    #[error("Unsupported schema '{schema}' (known schemas: {known})")]
    UnsupportedSchema { schema: String, known: String },

    /// Malformed input file
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A parser or tool option that is unknown or malformed
    #[error("Invalid option '{key}': {message}")]
    InvalidOption { key: String, message: String },

    /// A column name outside the fixed column set
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// Two rows share a uid where uids must be unique
    #[error("Duplicate identifier '{uid}'")]
    DuplicateIdentifier { uid: String },

    /// Tree computation requested without any sequences
    #[error("No sequences available to compute a tree")]
    EmptyInput,

    /// The external executable could not be started
    #[error("Could not run '{executable}': {message}")]
    ToolNotAvailable { executable: String, message: String },

    /// The external executable ran but reported failure
    #[error("'{executable}' exited with status {status:?}: {stderr}")]
    ToolFailed {
        executable: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Neither tree output file name exists
    #[error("Tree output not found at {primary} or {fallback}")]
    OutputNotFound { primary: PathBuf, fallback: PathBuf },

    /// Ancestral reconstruction failed
    #[error("Reconstruction error: {message}")]
    Reconstruction { message: String },

    /// A table does not describe a well-formed tree
    #[error("Invalid tree: {message}")]
    InvalidTree { message: String },

    /// Configuration file errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Type alias for Results using ProjectError
pub type Result<T> = std::result::Result<T, ProjectError>;

impl ProjectError {
    /// Create a parse error for a file
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a corrupt snapshot error
    pub fn corrupt_snapshot(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a reconstruction error
    pub fn reconstruction(message: impl Into<String>) -> Self {
        Self::Reconstruction {
            message: message.into(),
        }
    }

    pub fn invalid_tree(message: impl Into<String>) -> Self {
        Self::InvalidTree {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
