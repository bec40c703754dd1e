use thiserror::Error;

pub type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("malformed scores: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    MalformedScores {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("scores contain NaN at row {row}")]
    NanScore { row: usize },

    #[error("beam already finished")]
    BeamFinished,

    #[error("shape mismatch for {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("instance {0} is not active")]
    UnknownInstance(usize),

    #[error("rank {rank} out of range for beam of size {size}")]
    InvalidRank { rank: usize, size: usize },
}

pub(crate) fn invalid_config<S: Into<String>>(msg: S) -> DecodeError {
    DecodeError::InvalidConfig(msg.into())
}
