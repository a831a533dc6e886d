//! `EwfReader`: walks the section chain at open time, then serves
//! `(offset, length)` reads with transparent per-chunk decompression and
//! LRU caching.

use std::io::{self, Read, Seek, SeekFrom};

use flate2::read::ZlibDecoder;
use log::{debug, warn};

use crate::ewf::cache::{ChunkCache, DEFAULT_CAPACITY};
use crate::ewf::error::{EwfError, Result};
use crate::ewf::index::{TableIndex, TableRecord};
use crate::ewf::records::{
    self, decode_table_entry, section_type, FileHeaderV1, SectionDescriptor, TableHeaderMeta,
    VolumeDescriptor, FILE_HEADER_V1_SIZE, SECTION_DESCRIPTOR_SIZE, TABLE_HEADER_FIXED_SIZE,
};
use crate::ewf::storage::BackingStorage;

/// Whether section/table/volume checksums are enforced on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Checksum mismatches are logged as warnings; traversal continues.
    #[default]
    Permissive,
    /// Checksum mismatches fail the open with `EwfError::Checksum`.
    Strict,
}

/// Tunables for `EwfReader::open_with_config`.
#[derive(Debug, Clone, Copy)]
pub struct EwfReaderConfig {
    /// Chunk cache capacity, in decompressed chunks.
    pub cache_capacity: usize,
    pub verify: VerifyMode,
}

impl Default for EwfReaderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            verify: VerifyMode::default(),
        }
    }
}

/// A raw table, as seen during traversal, before its sentinel entry (which
/// needs `chunk_size`, only known once the volume section is parsed) has
/// been appended.
struct PendingTable {
    first_chunk_id: usize,
    meta: TableHeaderMeta,
    entries: Vec<u32>,
}

/// Opens an EWFv1 container over a `BackingStorage` and serves logically
/// contiguous reads over its chunk-compressed payload.
pub struct EwfReader<S: BackingStorage> {
    storage: S,
    chunk_size: usize,
    total_chunks: usize,
    index: TableIndex,
    cache: ChunkCache,
    case_header: Option<Vec<u8>>,
    case_header_utf16: Option<Vec<u8>>,
    position: u64,
}

/// Generous bound on section-chain steps, guarding against a corrupt cycle
/// that never reaches a self-referential `done` section.
const MAX_CHAIN_STEPS: usize = 16_000_000;

/// Chunk size assumed if the chain never carries a `disk`/`volume` section.
const FALLBACK_CHUNK_SIZE: usize = 64 * 512;

impl<S: BackingStorage> EwfReader<S> {
    /// Opens `storage` with default tunables (100-entry cache, permissive
    /// checksum verification).
    pub fn open(storage: S) -> Result<Self> {
        Self::open_with_config(storage, EwfReaderConfig::default())
    }

    /// Opens `storage`, walking the section chain and collecting tables and
    /// volume metadata before any `read` call is served.
    pub fn open_with_config(storage: S, config: EwfReaderConfig) -> Result<Self> {
        let header_bytes = storage.read(0, FILE_HEADER_V1_SIZE)?;
        FileHeaderV1::decode(&header_bytes)?;

        let mut current_offset: u64 = FILE_HEADER_V1_SIZE as u64;
        let mut chunk_size: Option<usize> = None;
        let mut pending_tables: Vec<PendingTable> = Vec::new();
        let mut running_chunk_count: usize = 0;
        let mut case_header = None;
        let mut case_header_utf16 = None;

        for step in 0..MAX_CHAIN_STEPS {
            let descriptor_bytes = storage.read(current_offset, SECTION_DESCRIPTOR_SIZE)?;
            if descriptor_bytes.len() < SECTION_DESCRIPTOR_SIZE {
                return Err(EwfError::TruncatedChain);
            }
            let descriptor = SectionDescriptor::decode(&descriptor_bytes)?;

            if config.verify == VerifyMode::Strict {
                let expected = SectionDescriptor::expected_checksum(&descriptor_bytes);
                if expected != descriptor.checksum {
                    return Err(EwfError::Checksum {
                        record: "section descriptor",
                        offset: current_offset,
                    });
                }
            } else if SectionDescriptor::expected_checksum(&descriptor_bytes) != descriptor.checksum
            {
                warn!(
                    "section descriptor checksum mismatch at offset {} (type {:?})",
                    current_offset, descriptor.section_type
                );
            }

            let payload_offset = current_offset + SECTION_DESCRIPTOR_SIZE as u64;
            debug!(
                "section {:?} at {} -> next {}",
                descriptor.section_type, current_offset, descriptor.next_offset
            );

            match descriptor.section_type.as_str() {
                section_type::HEADER => {
                    let len = descriptor.size.saturating_sub(SECTION_DESCRIPTOR_SIZE as u64);
                    match Self::inflate_section(&storage, payload_offset, len as usize) {
                        Ok(data) => case_header = Some(data),
                        Err(e) => warn!("could not decompress header section: {e}"),
                    }
                }
                section_type::HEADER2 => {
                    let len = descriptor.size.saturating_sub(SECTION_DESCRIPTOR_SIZE as u64);
                    match Self::inflate_section(&storage, payload_offset, len as usize) {
                        Ok(data) => case_header_utf16 = Some(data),
                        Err(e) => warn!("could not decompress header2 section: {e}"),
                    }
                }
                section_type::DISK | section_type::VOLUME => {
                    let volume_bytes =
                        storage.read(payload_offset, records::VOLUME_DESCRIPTOR_SIZE)?;
                    let volume = VolumeDescriptor::decode(&volume_bytes)?;
                    if config.verify == VerifyMode::Strict {
                        let expected = VolumeDescriptor::expected_checksum(&volume_bytes);
                        if expected != volume.checksum {
                            return Err(EwfError::Checksum {
                                record: "volume descriptor",
                                offset: payload_offset,
                            });
                        }
                    }
                    chunk_size = Some(volume.chunk_size());
                }
                section_type::TABLE => {
                    let header_bytes =
                        storage.read(payload_offset, TABLE_HEADER_FIXED_SIZE)?;
                    if header_bytes.len() < TABLE_HEADER_FIXED_SIZE {
                        return Err(EwfError::MalformedTable {
                            offset: payload_offset,
                            reason: "table header truncated".to_string(),
                        });
                    }
                    let meta = TableHeaderMeta::decode(&header_bytes)?;
                    if config.verify == VerifyMode::Strict {
                        let expected = TableHeaderMeta::expected_checksum(&header_bytes);
                        if expected != meta.checksum {
                            return Err(EwfError::Checksum {
                                record: "table header",
                                offset: payload_offset,
                            });
                        }
                    }

                    let entries_offset = payload_offset + TABLE_HEADER_FIXED_SIZE as u64;
                    let entries_len = meta.number_of_entries as usize * 4;
                    let raw_entries = storage.read(entries_offset, entries_len)?;
                    if raw_entries.len() < entries_len {
                        return Err(EwfError::MalformedTable {
                            offset: payload_offset,
                            reason: format!(
                                "expected {entries_len} bytes of entries, got {}",
                                raw_entries.len()
                            ),
                        });
                    }

                    let mut entries = Vec::with_capacity(meta.number_of_entries as usize);
                    let mut previous_relative: Option<u32> = None;
                    for chunk4 in raw_entries.chunks_exact(4) {
                        let entry = u32::from_le_bytes(chunk4.try_into().unwrap());
                        let (relative, _) = decode_table_entry(entry);
                        if let Some(prev) = previous_relative {
                            if relative <= prev {
                                return Err(EwfError::MalformedTable {
                                    offset: payload_offset,
                                    reason: "table entries are not strictly increasing"
                                        .to_string(),
                                });
                            }
                        }
                        previous_relative = Some(relative);
                        entries.push(entry);
                    }

                    pending_tables.push(PendingTable {
                        first_chunk_id: running_chunk_count,
                        meta,
                        entries,
                    });
                    running_chunk_count += meta.number_of_entries as usize;
                }
                section_type::SECTORS => {
                    // Payload is raw/compressed chunk data, addressed directly
                    // through the following table's entries; nothing to do here.
                }
                other => {
                    debug!("skipping unknown section type {other:?}");
                }
            }

            if descriptor.next_offset == current_offset {
                break;
            }
            current_offset = descriptor.next_offset;

            if step + 1 == MAX_CHAIN_STEPS {
                return Err(EwfError::TruncatedChain);
            }
        }

        let chunk_size = chunk_size.unwrap_or(FALLBACK_CHUNK_SIZE);

        let mut index = TableIndex::new();
        for pending in pending_tables {
            let mut entries = pending.entries;
            if let Some(&last) = entries.last() {
                let (last_relative, _) = decode_table_entry(last);
                let sentinel = last_relative.saturating_add(chunk_size as u32);
                entries.push(sentinel);
            }
            index.push(TableRecord {
                first_chunk_id: pending.first_chunk_id,
                meta: pending.meta,
                entries,
            });
        }

        Ok(Self {
            storage,
            chunk_size,
            total_chunks: running_chunk_count,
            index,
            cache: ChunkCache::new(config.cache_capacity),
            case_header,
            case_header_utf16,
            position: 0,
        })
    }

    fn inflate_section(storage: &S, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let compressed = storage.read(offset, len)?;
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Decompressed `header` section payload (ASCII case metadata), if any
    /// was present in the chain. Not interpreted by this core.
    pub fn case_header(&self) -> Option<&[u8]> {
        self.case_header.as_deref()
    }

    /// Decompressed `header2` section payload (UTF-16LE case metadata), if
    /// any was present in the chain. Not interpreted by this core.
    pub fn case_header_utf16(&self) -> Option<&[u8]> {
        self.case_header_utf16.as_deref()
    }

    /// Logical image size: `total_chunks * chunk_size`.
    pub fn size(&self) -> u64 {
        self.total_chunks as u64 * self.chunk_size as u64
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Reads and decompresses (or unwraps) a single chunk, consulting/
    /// populating the cache.
    fn read_chunk(&mut self, chunk_id: usize) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.get(chunk_id) {
            return Ok(data.to_vec());
        }

        let table = self
            .index
            .find_le(chunk_id)
            .ok_or(EwfError::ChunkNotFound(chunk_id))?;
        let local = chunk_id - table.first_chunk_id;
        if local + 1 >= table.entries.len() {
            return Err(EwfError::ChunkNotFound(chunk_id));
        }

        let (relative, compressed) = decode_table_entry(table.entries[local]);
        let (next_relative, _) = decode_table_entry(table.entries[local + 1]);
        let on_disk_offset = table.meta.base_offset + relative as u64;
        let on_disk_len = (next_relative as u64).saturating_sub(relative as u64) as usize;

        let raw = self.storage.read(on_disk_offset, on_disk_len)?;
        let data = if compressed {
            let mut decoder = ZlibDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|source| EwfError::Decompression { chunk_id, source })?;
            out
        } else {
            raw
        };

        self.cache.put(chunk_id, data.clone());
        Ok(data)
    }

    /// Reads up to `length` bytes starting at `offset`. Returns fewer bytes
    /// only when `offset + length` extends past the logical image.
    pub fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(length);
        let mut pos = offset;
        let mut remaining = length;

        while remaining > 0 {
            let chunk_id = (pos / self.chunk_size as u64) as usize;
            if chunk_id >= self.total_chunks {
                break;
            }
            let chunk_offset = (pos % self.chunk_size as u64) as usize;
            let data = self.read_chunk(chunk_id)?;
            if chunk_offset >= data.len() {
                break;
            }
            let available = std::cmp::min(remaining, data.len() - chunk_offset);
            result.extend_from_slice(&data[chunk_offset..chunk_offset + available]);
            pos += available as u64;
            remaining -= available;
        }

        Ok(result)
    }
}

impl<S: BackingStorage> Read for EwfReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = EwfReader::read(self, self.position, buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        self.position += data.len() as u64;
        Ok(data.len())
    }
}

impl<S: BackingStorage> Seek for EwfReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.size();
        let new_position = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position as i64 + offset,
            SeekFrom::End(offset) => size as i64 + offset,
        };
        if new_position < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.position = new_position as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ewf::storage::MemoryBackingStorage;
    use crate::ewf::writer::EwfWriter;
    use std::io::Write as _;

    fn round_trip(data: &[u8]) -> (Vec<u8>, EwfReader<MemoryBackingStorage>) {
        let storage = MemoryBackingStorage::new();
        {
            let mut writer = EwfWriter::open(&storage).unwrap();
            writer.write_all(data).unwrap();
            writer.close().unwrap();
        }
        let reader = EwfReader::open(storage).unwrap();
        (data.to_vec(), reader)
    }

    #[test]
    fn rejects_bad_signature() {
        let storage = MemoryBackingStorage::new();
        storage.write(0, b"NOTEVF!!").unwrap();
        let err = EwfReader::open(storage).unwrap_err();
        assert!(matches!(err, EwfError::SignatureMismatch));
    }

    #[test]
    fn small_payload_round_trips() {
        let (original, mut reader) = round_trip(b"Hello, EWF!");
        let size = reader.size();
        assert_eq!(size as usize, reader.chunk_size());
        let readback = reader.read(0, size as usize).unwrap();
        assert_eq!(&readback[..original.len()], &original[..]);
        assert!(readback[original.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn boundary_read_spans_two_chunks() {
        let chunk = 64 * 512;
        let data = vec![0u8; chunk * 2];
        let (_, mut reader) = round_trip(&data);
        let got = reader.read((chunk - 3) as u64, 6).unwrap();
        assert_eq!(got, vec![0u8; 6]);
    }

    #[test]
    fn cache_capacity_does_not_change_results() {
        let chunk = 64 * 512;
        let mut data = vec![0u8; chunk * 3];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let storage = MemoryBackingStorage::new();
        {
            let mut writer = EwfWriter::open(&storage).unwrap();
            writer.write_all(&data).unwrap();
            writer.close().unwrap();
        }
        let snapshot = storage.snapshot();

        for capacity in [0usize, 1, 100] {
            let storage = MemoryBackingStorage::new();
            storage.write(0, &snapshot).unwrap();
            let mut reader = EwfReader::open_with_config(
                storage,
                EwfReaderConfig {
                    cache_capacity: capacity,
                    verify: VerifyMode::Permissive,
                },
            )
            .unwrap();
            let got = reader.read(0, data.len()).unwrap();
            assert_eq!(got, data);
        }
    }

    #[test]
    fn random_access_is_consistent_across_splits() {
        let chunk = 64 * 512;
        let data: Vec<u8> = (0..chunk * 2 + 17).map(|i| (i % 256) as u8).collect();
        let (_, mut reader) = round_trip(&data);

        let a = 10u64;
        let b = (chunk * 2) as u64;
        for k in [0usize, 1, 100, (b - a) as usize] {
            let whole = reader.read(a, (b - a) as usize).unwrap();
            let first = reader.read(a, k).unwrap();
            let second = reader.read(a + k as u64, (b - a) as usize - k).unwrap();
            let mut combined = first;
            combined.extend(second);
            assert_eq!(whole, combined);
        }
    }
}
