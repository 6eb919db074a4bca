//! Error type of the control backend.
//!
//! [`CtrlError`] wraps compilation errors, socket and file I/O, JSON and TOML decoding, and
//! failures reported by the instruments themselves, so that streaming, configuration loading and
//! the device server all propagate errors with `?`.

use thiserror::Error;

use expcompiler_backend::CompileError;

/// Convenience alias for results using the control error type.
pub type CtrlResult<T> = std::result::Result<T, CtrlError>;

#[derive(Error, Debug)]
pub enum CtrlError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Instrument {name} error: {message}")]
    Instrument { name: String, message: String },

    #[error("Instrument {name}: unexpected response {response}")]
    UnexpectedResponse { name: String, response: String },

    #[error("Connection to instrument {0} closed")]
    ConnectionClosed(String),

    #[error("No instrument attached to device {0}")]
    NoInstrument(String),

    #[error("Device {0} must be compiled before streaming")]
    NotCompiled(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Analysis error: {0}")]
    Analysis(String),
}
