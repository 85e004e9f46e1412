//! Error types shared across the allocator and its collaborators.

use core::fmt::Debug;

/// Common trait implemented by every error type defined in this crate.
///
/// It is dependent on the [`Debug`] trait, which makes sense as we are
/// dealing with errors.
pub trait BaseError: Debug {}

/// `CanFail` is a return type for functions that are allowed to fail, and
/// don't need to return anything.
pub type CanFail<T> = Result<(), T>;

/// Return type for fallible block-device and metadata operations.
pub type IOResult<T> = Result<T, IOError>;

/// `IOError` defines several error types useful when communicating with the
/// block device backing a filesystem, or when validating the metadata read
/// from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IOError {
    /// The device rejected or failed the transfer.
    DeviceFailure,

    /// Block address outside the filesystem's logical block space.
    InvalidCommand,

    /// A metadata checksum did not match the value stored on disk.
    BadChecksum,

    Unknown,
}

impl BaseError for IOError {}

/// Errors raised while attaching to a filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountError {
    /// The superblock magic or checksum is invalid.
    BadSuperblock,

    IOError,
}

impl BaseError for MountError {}

/// Errors returned by the block allocator entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// A block-device or metadata failure. The filesystem counters are
    /// untouched; the caller must discard any dirty in-memory bitmap.
    Io(IOError),

    /// Every block group was scanned and no free block was found.
    ///
    /// This is the only expected failure; it is recoverable by freeing
    /// blocks and retrying.
    NoSpace,

    /// The request violates the filesystem's geometry (address below the
    /// first data block, or past the end of the block space).
    InvalidArgument,
}

impl BaseError for AllocError {}

impl From<IOError> for AllocError {
    fn from(err: IOError) -> Self {
        Self::Io(err)
    }
}
