//! Error types shared across Swarm crates.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("span line is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("span has an empty name")]
    EmptyName,

    #[error("invalid suffix pattern '{0}'")]
    InvalidPattern(String),
}

pub type Result<T> = std::result::Result<T, Error>;
