//! `WorldError`: this crate's own error type for failures specific to the
//! in-memory backend, converted to `func_core::error::FuncError::World` at
//! the trait boundary — the same `#[from]`-bridged two-layer error design
//! the teacher uses for `GraphError`/`CheckpointError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("no such file: {0}")]
    NotFound(String),
    #[error("lease revoked")]
    LeaseRevoked,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<WorldError> for func_core::error::FuncError {
    fn from(err: WorldError) -> Self {
        match err {
            WorldError::LeaseRevoked => func_core::error::FuncError::EndOfStream,
            other => func_core::error::FuncError::World(other.to_string()),
        }
    }
}
