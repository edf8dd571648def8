use crate::build::BuildError;
use crate::detect::DetectError;
use crate::store::StoreError;

/// An error from any phase of the lifecycle core.
///
/// Callers that need phase-specific handling match on the variants; the exit
/// code mapping in [`crate::exit`] is derived from this type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
