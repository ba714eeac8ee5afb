use thiserror::Error;

use tavla_core::BoardError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bad weights file: {0}")]
    WeightFormat(String),

    #[error("bad bearoff database: {0}")]
    BearoffFormat(String),

    #[error("invalid cube state: {0}")]
    InvalidCube(String),

    #[error("illegal position: {0}")]
    IllegalPosition(#[from] BoardError),

    #[error("evaluation interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
