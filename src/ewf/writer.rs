//! `EwfWriter`: accepts a sequential byte stream and lays out a well-formed
//! EWFv1 container — sectors sections interleaved with table sections,
//! finalized by a volume descriptor and a terminating `done` section.

use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::error;

use crate::ewf::error::{EwfError, Result};
use crate::ewf::records::{
    encode_table_entry, section_type, CompressionLevel, FileHeaderV1, MediaFlags, MediaType,
    SectionDescriptor, TableHeaderMeta, VolumeDescriptor, FILE_HEADER_V1_SIZE,
    SECTION_DESCRIPTOR_SIZE, TABLE_ENTRY_OFFSET_MASK, TABLE_HEADER_FIXED_SIZE,
    VOLUME_DESCRIPTOR_SIZE,
};
use crate::ewf::storage::BackingStorage;

/// Default chunk size: 64 sectors * 512 bytes/sector = 32 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 512;
/// Default per-table entry cap, keeping a table's addressable range under
/// ~0.91 GiB (30000 * 32 KiB), comfortably below the 31-bit offset ceiling.
pub const DEFAULT_TABLE_ENTRY_CAP: usize = 30_000;

/// A best-effort progress sink the writer reports table flushes to.
///
/// The core never requires one; a caller uninterested in progress
/// reporting uses `NoopProgress` (the default).
pub trait ReportProgress {
    fn report(&self, message: &str);
}

/// A `ReportProgress` that does nothing.
pub struct NoopProgress;

impl ReportProgress for NoopProgress {
    fn report(&self, _message: &str) {}
}

/// A `ReportProgress` that forwards to the `log` facade at `info` level.
pub struct LoggingProgress;

impl ReportProgress for LoggingProgress {
    fn report(&self, message: &str) {
        log::info!("{message}");
    }
}

/// Tunables for `EwfWriter::open_with_config`.
pub struct EwfWriterConfig {
    /// Uncompressed size of one chunk. Must be a multiple of 512.
    pub chunk_size: usize,
    /// zlib compression level applied to every chunk.
    pub compression: Compression,
    /// Maximum entries per table before an implicit flush + rollover.
    pub table_entry_cap: usize,
    /// Where `FlushTable` reports progress. `None` is a no-op.
    pub progress: Option<Box<dyn ReportProgress>>,
}

impl Default for EwfWriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: Compression::default(),
            table_entry_cap: DEFAULT_TABLE_ENTRY_CAP,
            progress: None,
        }
    }
}

fn compress(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    encoder.finish()
}

fn compression_level_tag(level: Compression) -> CompressionLevel {
    match level.level() {
        0 => CompressionLevel::None,
        1..=5 => CompressionLevel::Fast,
        _ => CompressionLevel::Best,
    }
}

/// Produces a well-formed EWFv1 container from a sequential byte stream.
///
/// Must be closed — either explicitly via `close()` or implicitly on
/// `Drop` — for the output to be a valid, readable container (the final
/// table, volume descriptor, and `done` section are only written at
/// close time).
pub struct EwfWriter<S: BackingStorage> {
    storage: S,
    chunk_size: usize,
    compression: Compression,
    table_entry_cap: usize,
    progress: Option<Box<dyn ReportProgress>>,

    current_offset: u64,
    base_offset: u64,
    buffer: Vec<u8>,
    chunk_id: usize,
    table: Vec<u32>,
    table_count: usize,

    last_section: Option<SectionDescriptor>,
    last_section_offset: u64,

    closed: bool,
}

impl<S: BackingStorage> EwfWriter<S> {
    /// Opens `storage` for writing with default tunables (32 KiB chunks,
    /// zlib default compression, 30000-entry table cap, no progress sink).
    pub fn open(storage: S) -> Result<Self> {
        Self::open_with_config(storage, EwfWriterConfig::default())
    }

    /// Opens `storage` for writing, immediately emitting the file header and
    /// the first `sectors` section.
    pub fn open_with_config(storage: S, config: EwfWriterConfig) -> Result<Self> {
        if config.chunk_size % 512 != 0 {
            return Err(EwfError::InvalidChunkSize(config.chunk_size));
        }

        // A table's last relative offset is at most table_entry_cap *
        // chunk_size (the sentinel entry appended one chunk past the last
        // real one); that must still fit the 31-bit offset a table entry
        // encodes, or `encode_table_entry` panics and on-disk offsets wrap.
        let max_table_span = config.table_entry_cap as u64 * config.chunk_size as u64;
        if max_table_span > TABLE_ENTRY_OFFSET_MASK as u64 {
            return Err(EwfError::InvalidTableEntryCap {
                table_entry_cap: config.table_entry_cap,
                chunk_size: config.chunk_size,
            });
        }

        let header = FileHeaderV1::new(1);
        storage.write(0, &header.encode())?;

        let mut writer = Self {
            storage,
            chunk_size: config.chunk_size,
            compression: config.compression,
            table_entry_cap: config.table_entry_cap,
            progress: config.progress,
            current_offset: FILE_HEADER_V1_SIZE as u64,
            base_offset: 0,
            buffer: Vec::new(),
            chunk_id: 0,
            table: Vec::new(),
            table_count: 0,
            last_section: None,
            last_section_offset: 0,
            closed: false,
        };
        writer.start_new_table()?;
        Ok(writer)
    }

    /// Emits a section descriptor at `self.current_offset`, patching the
    /// previously emitted descriptor's `next`/`size`/checksum now that its
    /// end is known. Returns the new section's offset.
    ///
    /// `initial_size` is only ever observed for the *last* section ever
    /// emitted (it is overwritten by the next call otherwise) — for a
    /// payload-less section like `done`, that's simply
    /// `SECTION_DESCRIPTOR_SIZE`, which also happens to make `done` end up
    /// self-referential without any special-casing: every section starts
    /// life pointing at itself, and only gets patched to point forward when
    /// a following section is created.
    fn emit_section(&mut self, section_type: &str, initial_size: u64) -> Result<u64> {
        let this_offset = self.current_offset;

        if let Some(mut prev) = self.last_section.take() {
            prev.next_offset = this_offset;
            prev.size = this_offset - self.last_section_offset;
            self.storage.write(self.last_section_offset, &prev.encode())?;
        }

        let descriptor = SectionDescriptor::new(section_type, this_offset, initial_size);
        self.storage.write(this_offset, &descriptor.encode())?;

        self.last_section = Some(descriptor);
        self.last_section_offset = this_offset;
        self.current_offset = this_offset + SECTION_DESCRIPTOR_SIZE as u64;
        Ok(this_offset)
    }

    fn start_new_table(&mut self) -> Result<()> {
        self.table.clear();
        self.table_count += 1;
        self.emit_section(section_type::SECTORS, SECTION_DESCRIPTOR_SIZE as u64)?;
        self.base_offset = self.current_offset;
        Ok(())
    }

    fn flush_table(&mut self) -> Result<()> {
        if let Some(progress) = &self.progress {
            progress.report(&format!("Flushing EWF Table {}", self.table_count));
        }

        self.emit_section(section_type::TABLE, SECTION_DESCRIPTOR_SIZE as u64)?;

        let meta = TableHeaderMeta {
            number_of_entries: self.table.len() as u64,
            base_offset: self.base_offset,
            checksum: 0,
        };
        self.storage.write(self.current_offset, &meta.encode())?;
        self.current_offset += TABLE_HEADER_FIXED_SIZE as u64;

        let mut entry_bytes = Vec::with_capacity(self.table.len() * 4);
        for entry in &self.table {
            entry_bytes.extend_from_slice(&entry.to_le_bytes());
        }
        self.storage.write(self.current_offset, &entry_bytes)?;
        self.current_offset += entry_bytes.len() as u64;
        Ok(())
    }

    /// Appends `data` to the pending byte stream, compressing and writing
    /// out every chunk that becomes complete. Implicitly rolls over to a
    /// new table when the current one exceeds its entry cap.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);

        let mut consumed = 0;
        while self.buffer.len() - consumed >= self.chunk_size {
            let block = &self.buffer[consumed..consumed + self.chunk_size];
            let cdata = compress(block, self.compression)?;
            let relative_offset = (self.current_offset - self.base_offset) as u32;

            let (to_write, compressed) = if cdata.len() > block.len() {
                (block.to_vec(), false)
            } else {
                (cdata, true)
            };

            self.table
                .push(encode_table_entry(relative_offset, compressed));
            self.storage.write(self.current_offset, &to_write)?;
            self.current_offset += to_write.len() as u64;

            consumed += self.chunk_size;
            self.chunk_id += 1;

            if self.table.len() > self.table_entry_cap {
                self.flush_table()?;
                self.start_new_table()?;
            }
        }

        self.buffer.drain(0..consumed);
        Ok(())
    }

    /// Flushes any buffered partial chunk (zero-padded), writes the final
    /// table, volume descriptor, and terminating `done` section.
    ///
    /// Idempotent: a second call is a no-op, matching the "close after
    /// close" contract.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.buffer.is_empty() {
            let pad = self.chunk_size - self.buffer.len();
            self.write(&vec![0u8; pad])?;
        }

        self.flush_table()?;

        self.emit_section(
            section_type::VOLUME,
            (SECTION_DESCRIPTOR_SIZE + VOLUME_DESCRIPTOR_SIZE) as u64,
        )?;
        let sectors_per_chunk = (self.chunk_size / 512) as u32;
        let volume = VolumeDescriptor {
            media_type: MediaType::FixedDisk,
            number_of_chunks: self.chunk_id as u32,
            sectors_per_chunk,
            bytes_per_sector: 512,
            number_of_sectors: self.chunk_id as u64 * sectors_per_chunk as u64,
            chs_cylinders: 0,
            chs_heads: 0,
            chs_sectors: 0,
            media_flags: MediaFlags::empty(),
            compression_level: compression_level_tag(self.compression),
            checksum: 0,
        };
        self.storage.write(self.current_offset, &volume.encode())?;
        self.current_offset += VOLUME_DESCRIPTOR_SIZE as u64;

        self.emit_section(section_type::DONE, SECTION_DESCRIPTOR_SIZE as u64)?;
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_id
    }

    pub fn table_count(&self) -> usize {
        self.table_count
    }
}

impl<S: BackingStorage> io::Write for EwfWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        EwfWriter::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: BackingStorage> Drop for EwfWriter<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                error!("error finalizing EWF writer on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ewf::reader::EwfReader;
    use crate::ewf::records::{decode_table_entry, FileHeaderV1};
    use crate::ewf::storage::MemoryBackingStorage;

    #[test]
    fn progress_sink_is_invoked_on_table_flush() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct CountingProgress(Arc<AtomicUsize>);
        impl ReportProgress for CountingProgress {
            fn report(&self, _message: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let storage = MemoryBackingStorage::new();
        let config = EwfWriterConfig {
            progress: Some(Box::new(CountingProgress(calls.clone()))),
            ..EwfWriterConfig::default()
        };
        let mut writer = EwfWriter::open_with_config(&storage, config).unwrap();
        writer.write(&vec![0u8; DEFAULT_CHUNK_SIZE]).unwrap();
        writer.close().unwrap();

        // One flush at close, reporting progress exactly once.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // NoopProgress and LoggingProgress are the two stock sinks offered
        // alongside a custom one; both must actually be usable as a
        // `ReportProgress` trait object without a custom impl.
        let storage = MemoryBackingStorage::new();
        let config = EwfWriterConfig {
            progress: Some(Box::new(NoopProgress)),
            ..EwfWriterConfig::default()
        };
        let mut writer = EwfWriter::open_with_config(&storage, config).unwrap();
        writer.write(b"quiet").unwrap();
        writer.close().unwrap();

        let storage = MemoryBackingStorage::new();
        let config = EwfWriterConfig {
            progress: Some(Box::new(LoggingProgress)),
            ..EwfWriterConfig::default()
        };
        let mut writer = EwfWriter::open_with_config(&storage, config).unwrap();
        writer.write(b"logged").unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn writer_emits_valid_file_header() {
        let storage = MemoryBackingStorage::new();
        {
            let mut writer = EwfWriter::open(&storage).unwrap();
            writer.close().unwrap();
        }
        let snapshot = storage.snapshot();
        let header = FileHeaderV1::decode(&snapshot[0..FILE_HEADER_V1_SIZE]).unwrap();
        assert_eq!(header.segment_number, 1);
    }

    #[test]
    fn incompressible_chunk_is_stored_raw() {
        use rand::RngCore;

        let chunk_size = DEFAULT_CHUNK_SIZE;
        let mut data = vec![0u8; chunk_size];
        rand::thread_rng().fill_bytes(&mut data);

        let storage = MemoryBackingStorage::new();
        {
            let mut writer = EwfWriter::open(&storage).unwrap();
            writer.write(&data).unwrap();
            writer.close().unwrap();
        }

        let reader = EwfReader::open(storage).unwrap();
        assert_eq!(reader.chunk_size(), chunk_size);
    }

    #[test]
    fn compressible_chunks_set_compressed_flag() {
        let chunk_size = DEFAULT_CHUNK_SIZE;
        let data = vec![0u8; chunk_size * 2];

        let storage = MemoryBackingStorage::new();
        let mut writer = EwfWriter::open(&storage).unwrap();
        writer.write(&data).unwrap();
        // Inspect the in-progress table before close() rewrites state.
        assert_eq!(writer.table.len(), 2);
        for entry in &writer.table {
            let (_, compressed) = decode_table_entry(*entry);
            assert!(compressed);
        }
        writer.close().unwrap();
    }

    #[test]
    fn table_rolls_over_past_entry_cap() {
        let storage = MemoryBackingStorage::new();
        let config = EwfWriterConfig {
            table_entry_cap: 2,
            ..EwfWriterConfig::default()
        };
        let mut writer = EwfWriter::open_with_config(&storage, config).unwrap();
        let chunk = vec![0xABu8; DEFAULT_CHUNK_SIZE];
        for _ in 0..5 {
            writer.write(&chunk).unwrap();
        }
        writer.close().unwrap();

        assert!(writer.table_count() >= 2);

        let mut reader = EwfReader::open(storage).unwrap();
        let last_chunk_offset = (4 * DEFAULT_CHUNK_SIZE) as u64;
        let got = reader.read(last_chunk_offset, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(got, chunk);
    }

    #[test]
    fn close_is_idempotent() {
        let storage = MemoryBackingStorage::new();
        let mut writer = EwfWriter::open(&storage).unwrap();
        writer.write(b"short").unwrap();
        writer.close().unwrap();
        let after_first = storage.snapshot();
        writer.close().unwrap();
        assert_eq!(storage.snapshot(), after_first);
    }

    #[test]
    fn rejects_chunk_size_not_multiple_of_sector_size() {
        let storage = MemoryBackingStorage::new();
        let config = EwfWriterConfig {
            chunk_size: 1000,
            ..EwfWriterConfig::default()
        };
        let err = EwfWriter::open_with_config(&storage, config).unwrap_err();
        assert!(matches!(err, EwfError::InvalidChunkSize(1000)));
    }

    #[test]
    fn rejects_table_entry_cap_exceeding_31_bit_offset_budget() {
        let storage = MemoryBackingStorage::new();
        let config = EwfWriterConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            table_entry_cap: (u32::MAX as usize / DEFAULT_CHUNK_SIZE) + 1,
            ..EwfWriterConfig::default()
        };
        let err = EwfWriter::open_with_config(&storage, config).unwrap_err();
        assert!(matches!(err, EwfError::InvalidTableEntryCap { .. }));
    }

    #[test]
    fn default_table_entry_cap_stays_within_offset_budget() {
        let storage = MemoryBackingStorage::new();
        EwfWriter::open_with_config(&storage, EwfWriterConfig::default()).unwrap();
    }
}
