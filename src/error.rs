//! Errors and validation issues
//!
//! The same type is used for hard decode failures, returned as `Err`, and for
//! advisory issues collected by the validation pass.

use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum FlashError {
    /// The buffer is shorter than what a decode step requires.
    ImageTooSmall(String),
    /// No flash descriptor signature at either known position.
    SignatureNotFound,
    /// A fixed-size record was given a window of the wrong size.
    InvalidRecordSize { expected: usize, got: usize },
    /// A block map ran out of bytes before its terminator.
    TruncatedData(String),
    /// A descriptor base address exceeds the permitted maximum.
    InvalidBaseAddr(String),
    /// A region points outside of the image.
    RegionOutOfBounds(String),
    /// A region is in use, but its base lies above its limit.
    InvalidRegion(String),
    /// A firmware volume header is inconsistent.
    InvalidVolume(String),
}

impl Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageTooSmall(m) => write!(f, "image too small: {m}"),
            Self::SignatureNotFound => write!(f, "flash descriptor signature not found"),
            Self::InvalidRecordSize { expected, got } => {
                write!(f, "invalid record size: expected {expected} bytes, got {got}")
            }
            Self::TruncatedData(m) => write!(f, "truncated data: {m}"),
            Self::InvalidBaseAddr(m) => write!(f, "invalid base address: {m}"),
            Self::RegionOutOfBounds(m) => write!(f, "region out of bounds: {m}"),
            Self::InvalidRegion(m) => write!(f, "invalid region: {m}"),
            Self::InvalidVolume(m) => write!(f, "invalid firmware volume: {m}"),
        }
    }
}

impl std::error::Error for FlashError {}

#[test]
fn display_carries_message() {
    let e = FlashError::InvalidBaseAddr("MasterBase too large".into());
    assert_eq!(e.to_string(), "invalid base address: MasterBase too large");
    let e = FlashError::InvalidRecordSize {
        expected: 36,
        got: 20,
    };
    assert_eq!(e.to_string(), "invalid record size: expected 36 bytes, got 20");
}
