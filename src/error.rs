use thiserror::Error;

use crate::ring::Id;

pub type ChordResult<T> = std::result::Result<T, ChordError>;

#[derive(Error, Debug)]
pub enum ChordError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("name '{0}' is already registered with a different uri")]
    NameConflict(String),

    #[error("no node registered as '{0}'")]
    UnknownNode(String),

    #[error("all {0} chord identifiers are taken")]
    IdentifiersExhausted(u64),

    #[error("routing gave up after {0} hops")]
    HopLimitExceeded(u32),

    #[error("node {0} has no successor yet")]
    NotJoined(Id),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ChordError {
    fn from(e: reqwest::Error) -> Self {
        ChordError::Transport(e.to_string())
    }
}

impl ChordError {
    /// A remote replied with a non-success status that does not map to a
    /// protocol value (404 on `get` is a value, not an error).
    pub fn bad_status(what: &str, status: reqwest::StatusCode) -> Self {
        ChordError::Transport(format!("{what} returned {status}"))
    }
}
