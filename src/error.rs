use h3o::error::{InvalidGeometry, InvalidLatLng, LocalIjError};

/// Errors that can cross this crate's public boundary.
///
/// Everything else in the bitmap index and join engine is total by
/// construction: an empty index, an empty probe or a missing base cell is
/// "no match", not a failure. Cell-set compaction (§4.3) is implemented
/// directly on this crate's own cell codec rather than via an external H3
/// compaction call, so it has no fallible case of its own.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two [`crate::bjoin::Bjoin`] matrices were combined (`and`/`or`/`and_not`)
    /// despite having a different `offset`.
    #[error("cannot combine two bjoin matrices with different offsets ({left} != {right})")]
    DifferentOffset { left: u64, right: u64 },

    #[error(transparent)]
    InvalidLatLng(#[from] InvalidLatLng),
    #[error(transparent)]
    InvalidGeometry(#[from] InvalidGeometry),
    /// `gridPath` between two line-segment endpoints hit a pentagon or a
    /// resolution mismatch (§4.3/§6).
    #[error(transparent)]
    GridPath(#[from] LocalIjError),
}

pub type Result<T> = std::result::Result<T, Error>;
