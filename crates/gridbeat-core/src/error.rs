//! Error types for gridbeat-core

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid pitch: {0:?}")]
    InvalidPitch(String),
    #[error("Unknown instrument type: {0:?}")]
    UnknownInstrument(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
