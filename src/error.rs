//! The crate-level error type.
//!
//! Every module defines its own, narrower error enum for the failures it can
//! produce locally (see [`crate::message::DecodeError`],
//! [`crate::metainfo::MetainfoError`], [`crate::tracker::TrackerError`]).
//! Per the disposition table in the design, every one of those is recovered
//! at the point it occurs (drop the session, reset the piece, try the next
//! tracker URL, fall back to an empty peer list) and never reaches `main`.
//! [`Error`] exists only for `MetainfoInvalid`, the one genuinely fatal
//! startup failure the design names.
use crate::metainfo::MetainfoError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid metainfo file: {0}")]
    Metainfo(#[from] MetainfoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
