//! EWFv1 (Expert Witness Format) container reader/writer.
//!
//! This module is the whole of the on-disk format machinery: walking the
//! singly-linked chain of section descriptors, parsing chunk-offset tables,
//! Adler-32 checksums, chunked zlib (de)compression with an LRU cache, and
//! — on write — patching each prior section's `next` pointer as the
//! following one is laid down.
//!
//! Compatibility with third-party EWF tools, encryption, random writes, and
//! multi-segment output are explicitly out of scope; see the crate-level
//! documentation for the full rationale.

mod cache;
mod checksum;
mod error;
mod index;
mod reader;
mod records;
mod storage;
mod writer;

pub use error::{EwfError, Result};
pub use reader::{EwfReader, EwfReaderConfig, VerifyMode};
pub use records::{CompressionLevel, MediaFlags, MediaType};
pub use storage::{BackingStorage, FileBackingStorage, MemoryBackingStorage};
pub use writer::{
    EwfWriter, EwfWriterConfig, LoggingProgress, NoopProgress, ReportProgress,
    DEFAULT_CHUNK_SIZE, DEFAULT_TABLE_ENTRY_CAP,
};
