//! Error taxonomy for the EWF reader and writer.
//!
//! See the error handling rules in the crate-level documentation: most
//! conditions are fatal to the enclosing operation, a small number are
//! recoverable (table rollover on write, short reads on read).

use thiserror::Error;

/// Everything that can go wrong opening, reading, or writing an EWF
/// container.
#[derive(Debug, Error)]
pub enum EwfError {
    /// The 8-byte magic at offset 0 did not match any known EWF signature.
    #[error("invalid EWF signature")]
    SignatureMismatch,

    /// The magic matched EWFv2, which this core only recognizes, never reads.
    #[error("EWFv2 containers are not supported, only EWFv1")]
    UnsupportedVersion,

    /// The file header's sentinel fields (`fields_start`/`fields_end`) were
    /// not the expected value.
    #[error("invalid EWF file header fields")]
    InvalidFileHeader,

    /// The `next` chain did not reach a self-referential `done` section
    /// before running off the end of the medium or exceeding the step bound.
    #[error("section chain is truncated or cyclic")]
    TruncatedChain,

    /// A table's entry array extends past the end of the medium, or entries
    /// are not strictly increasing.
    #[error("malformed table at segment offset {offset}: {reason}")]
    MalformedTable {
        /// Byte offset of the table header that failed to parse.
        offset: u64,
        /// Human-readable reason.
        reason: String,
    },

    /// A section descriptor, table header, or volume header checksum did not
    /// match in strict verification mode.
    #[error("checksum mismatch in {record} at offset {offset}")]
    Checksum {
        /// Which kind of record failed verification.
        record: &'static str,
        /// Byte offset of the record.
        offset: u64,
    },

    /// zlib reported an invalid compressed stream while inflating a chunk.
    #[error("failed to decompress chunk {chunk_id}: {source}")]
    Decompression {
        /// The chunk that failed to decompress.
        chunk_id: usize,
        /// Underlying I/O error surfaced by the decompressor.
        #[source]
        source: std::io::Error,
    },

    /// A chunk was requested that has no enclosing table.
    #[error("chunk {0} is not covered by any table")]
    ChunkNotFound(usize),

    /// The writer was constructed with a `chunk_size` that is not a multiple
    /// of 512 bytes, which would make `sectors_per_chunk` lossy.
    #[error("chunk size {0} is not a multiple of the 512-byte sector size")]
    InvalidChunkSize(usize),

    /// The writer was constructed with a `table_entry_cap` that, combined
    /// with `chunk_size`, would let a table's addressable range exceed the
    /// 31-bit relative-offset budget a table entry can encode.
    #[error(
        "table entry cap {table_entry_cap} with chunk size {chunk_size} exceeds the 31-bit \
         per-table offset budget"
    )]
    InvalidTableEntryCap {
        /// The offending `table_entry_cap`.
        table_entry_cap: usize,
        /// The `chunk_size` it was validated against.
        chunk_size: usize,
    },

    /// Backing-storage I/O errors are propagated unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the `ewf` module.
pub type Result<T> = std::result::Result<T, EwfError>;

impl From<EwfError> for std::io::Error {
    fn from(err: EwfError) -> Self {
        match err {
            EwfError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}
