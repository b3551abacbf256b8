use thiserror::Error;

/// Errors that can occur while saving or loading records. Marked as non-exhaustive to allow for
/// future additions. A caller would usually only need to distinguish between `FlashError`, which
/// hints at broken hardware, and the validation errors, after which it should fall back to
/// default values.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The region has to start and end on a page (erase size) boundary and must not be empty. A
    /// chunk sector must also hold fewer than `u16::MAX` state chunks.
    #[error("invalid region")]
    InvalidRegion,

    /// The region cannot hold even a single copy of the record layout.
    #[error("region too small")]
    RegionTooSmall,

    /// `u32::MAX` is the tag of erased flash and cannot identify a record type.
    #[error("invalid chunk tag")]
    InvalidTag,

    /// The internal error value is returned from the provided flash device.
    #[error("internal flash error")]
    FlashError,

    /// The stored checksum does not match the stored payload. Either the flash is blank, was
    /// corrupted or a write was torn by a power loss.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The chunk header carries a different type tag. The tag that was found is reported.
    #[error("chunk tag mismatch: {0:#010x}")]
    TagMismatch(u32),

    /// The chunk header carries a different payload size. The size that was found is reported.
    #[error("chunk size mismatch: {0}")]
    SizeMismatch(u16),

    /// No slot of a versioned region holds a block with a valid checksum and version.
    #[error("no valid block")]
    NoValidBlock,

    /// The flash controller stayed busy for longer than the configured poll budget.
    #[error("flash busy timeout")]
    Timeout,

    /// The flash controller reported an error, the job was dropped.
    #[error("job aborted")]
    JobAborted,
}
