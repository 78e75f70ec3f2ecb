use crate::engine::EngineError;
use std::path::PathBuf;

/// Errors returned through a [`Handle`](crate::Handle).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The handle was closed before the operation was admitted. Nothing
    /// reached the engine. Retrying on the same handle will not help.
    #[error("handle closed")]
    HandleClosed,
    /// The engine could not open `location`. No handle state exists.
    #[error("unhandled resource error opening {location:?}")]
    Open {
        location: PathBuf,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl Error {
    pub fn is_handle_closed(&self) -> bool {
        matches!(self, Error::HandleClosed)
    }

    /// Whether the engine reported the key as missing.
    pub fn is_no_such_key(&self) -> bool {
        matches!(self, Error::Engine(EngineError::NoSuchKey))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
