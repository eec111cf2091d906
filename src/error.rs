use mapforge_map::{BackendError, LoadError};
use thiserror::Error;

/// Why a chunk could not be processed. The run controller retries the chunk and counts it as an error once the retries
/// are used up.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),
}
