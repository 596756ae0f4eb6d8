//! Error types.
//!
//! - `CalError` is the library taxonomy: every fallible calibration or
//!   configuration operation returns it.
//! - `AppError` is what the binary reports: a message plus a process exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::runconfig::LayoutMode;

#[derive(Debug, Error)]
pub enum CalError {
    /// No calibration, fit, device or field for the given key.
    #[error("no {what} found for {key}")]
    NotFound { what: &'static str, key: String },

    #[error("malformed document '{}': {message}", path.display())]
    MalformedDocument { path: PathBuf, message: String },

    #[error("unknown fit model '{0}'")]
    UnknownFitModel(String),

    #[error("fit '{curve}' is missing parameter '{param}'")]
    MissingParameter { curve: String, param: &'static str },

    #[error("fit '{curve}' failed sanity check: {reason}")]
    SanityCheckFailed { curve: String, reason: String },

    #[error("no real root solving for y={y}")]
    NoRealRoot { y: f64 },

    #[error("division by zero inverting fit at y={y}")]
    DivisionByZero { y: f64 },

    #[error("no hub configurations resolved in '{}' using the {layout} layout", path.display())]
    LayoutMismatch { path: PathBuf, layout: LayoutMode },

    #[error("unknown chip '{0}'")]
    UnknownChip(String),

    #[error("I/O failure on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CalError {
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        CalError::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CalError::MalformedDocument {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CalError::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            CalError::Io { .. } | CalError::MalformedDocument { .. } => 2,
            CalError::LayoutMismatch { .. } | CalError::NotFound { .. } => 3,
            _ => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<CalError> for AppError {
    fn from(err: CalError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
