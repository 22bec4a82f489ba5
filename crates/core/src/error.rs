// crates/core/src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LotseError {
    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Fusion error: {0}")]
    Fusion(String),

    #[error("Dialogue error: {0}")]
    Dialogue(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type LotseResult<T> = Result<T, LotseError>;
