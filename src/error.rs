// Error taxonomy for the NTFS decoder.
//
// Every decode step validates eagerly and reports one of these instead of
// continuing on partially-valid data. A failed resolution must surface as
// "unavailable" to callers, never as an empty file.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NtfsError {
    /// Out-of-range record numbers, attribute indexes, bad geometry requests.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bad `FILE` signature, fixup mismatch, sequence mismatch, truncated
    /// attribute headers.
    #[error("corrupt MFT record {record}: {detail}")]
    RecordCorrupt { record: u64, detail: String },

    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    /// The attribute list decoded to nothing, named a fragment that does not
    /// exist, or pointed at a record from another chain.
    #[error("corrupt attribute list in record {record}: {detail}")]
    AttributeListCorrupt { record: u64, detail: String },

    /// Compressed streams are detected and rejected.
    #[error("unsupported attribute: {0}")]
    UnsupportedAttribute(String),

    #[error("device I/O error: {0}")]
    DeviceIo(#[from] std::io::Error),

    #[error("allocation bitmap unavailable: {0}")]
    BitmapUnavailable(String),

    #[error("invalid partition boot sector: {0}")]
    BootSector(String),

    /// Bad `INDX` node, malformed index entry or a cyclic / too deep tree.
    #[error("corrupt directory index: {0}")]
    IndexCorrupt(String),
}

pub type Result<T> = std::result::Result<T, NtfsError>;

impl NtfsError {
    pub(crate) fn corrupt(record: u64, detail: impl Into<String>) -> Self {
        NtfsError::RecordCorrupt {
            record,
            detail: detail.into(),
        }
    }

    pub(crate) fn list_corrupt(record: u64, detail: impl Into<String>) -> Self {
        NtfsError::AttributeListCorrupt {
            record,
            detail: detail.into(),
        }
    }
}
