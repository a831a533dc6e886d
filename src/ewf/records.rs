//! Fixed-layout binary records for the EWFv1 container.
//!
//! Each record is a plain struct with `encode`/`decode` methods operating on
//! byte slices at known offsets — no reflection-driven type profile, no
//! virtual dispatch, per the design notes. A handful of free functions act
//! as the "cursor" helper for reading/writing little-endian integers at a
//! fixed offset within a slice.

use crate::ewf::checksum::adler32;
use crate::ewf::error::{EwfError, Result};

use bitflags::bitflags;

/// EWFv1 magic bytes: `"EVF\t\r\n\xff\0"`.
pub const MAGIC_V1: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
/// EWFv2 magic bytes, recognized but not read/written by this core.
pub const MAGIC_V2: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0D, 0x0A, 0x81, 0x00];

/// Size of the v1 file header, in bytes.
pub const FILE_HEADER_V1_SIZE: usize = 13;
/// Size of a v1 section descriptor, in bytes.
pub const SECTION_DESCRIPTOR_SIZE: usize = 76;
/// Byte offset of the checksum field within a section descriptor.
const SECTION_DESCRIPTOR_CHECKSUM_OFFSET: usize = 72;
/// Size of the volume descriptor, in bytes.
pub const VOLUME_DESCRIPTOR_SIZE: usize = 94;
/// Byte offset of the checksum field within the volume descriptor.
const VOLUME_DESCRIPTOR_CHECKSUM_OFFSET: usize = 90;
/// Fixed-size prefix of a table header, before the entry array.
pub const TABLE_HEADER_FIXED_SIZE: usize = 24;
/// Byte offset of the checksum field within a table header.
const TABLE_HEADER_CHECKSUM_OFFSET: usize = 20;

/// Section type tags, as 16-byte zero-padded ASCII.
pub mod section_type {
    pub const HEADER: &str = "header";
    pub const HEADER2: &str = "header2";
    pub const DISK: &str = "disk";
    pub const VOLUME: &str = "volume";
    pub const SECTORS: &str = "sectors";
    pub const TABLE: &str = "table";
    pub const DONE: &str = "done";
}

fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap())
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_u64_le(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64_le(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Encodes a section type tag into its 16-byte zero-padded ASCII form.
fn encode_section_type(tag: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = tag.as_bytes();
    assert!(bytes.len() <= 16, "section type tag too long: {tag}");
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

/// Decodes a 16-byte zero-padded ASCII section type tag.
fn decode_section_type(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// The v1 file header: 8-byte magic, `fields_start`, `segment_number`,
/// `fields_end`.
#[derive(Debug, Clone, Copy)]
pub struct FileHeaderV1 {
    pub segment_number: u16,
}

impl FileHeaderV1 {
    /// Builds the header the writer always emits: segment 1, both field
    /// sentinels set to 1.
    pub fn new(segment_number: u16) -> Self {
        Self { segment_number }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_V1_SIZE] {
        let mut buf = [0u8; FILE_HEADER_V1_SIZE];
        buf[0..8].copy_from_slice(&MAGIC_V1);
        buf[8] = 1; // fields_start
        write_u16_le(&mut buf, 9, self.segment_number);
        write_u16_le(&mut buf, 11, 1); // fields_end
        buf
    }

    /// Validates the magic and sentinel fields, returning the parsed header.
    ///
    /// `Err(EwfError::UnsupportedVersion)` if the bytes carry the v2 magic
    /// instead; `Err(EwfError::SignatureMismatch)` if neither magic matches.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FILE_HEADER_V1_SIZE {
            return Err(EwfError::SignatureMismatch);
        }
        let magic = &buf[0..8];
        if magic == MAGIC_V2 {
            return Err(EwfError::UnsupportedVersion);
        }
        if magic != MAGIC_V1 {
            return Err(EwfError::SignatureMismatch);
        }

        let fields_start = buf[8];
        let segment_number = read_u16_le(buf, 9);
        let fields_end = read_u16_le(buf, 11);
        if fields_start != 1 || fields_end != 1 {
            return Err(EwfError::InvalidFileHeader);
        }

        Ok(Self { segment_number })
    }
}

/// Compression method carried by a v2 file header. Recognized, never used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Deflate,
    Bzip2,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Deflate,
            2 => Self::Bzip2,
            other => Self::Unknown(other),
        }
    }
}

/// The v2 file header. This core recognizes the signature (see
/// `EwfError::UnsupportedVersion`) but never constructs or fully parses one;
/// kept here only as documentation of what a v2-aware caller would need.
#[derive(Debug, Clone)]
pub struct FileHeaderV2 {
    pub major_version: u8,
    pub minor_version: u8,
    pub compression_method: CompressionMethod,
    pub segment_number: u16,
    pub set_identifier: [u8; 16],
}

impl FileHeaderV2 {
    pub const SIZE: usize = 30;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE || buf[0..8] != MAGIC_V2 {
            return Err(EwfError::SignatureMismatch);
        }
        Ok(Self {
            major_version: buf[8],
            minor_version: buf[9],
            compression_method: read_u16_le(buf, 10).into(),
            segment_number: read_u16_le(buf, 12),
            set_identifier: buf[14..30].try_into().unwrap(),
        })
    }
}

/// A section descriptor: the 76-byte record preceding every section.
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub section_type: String,
    pub next_offset: u64,
    pub size: u64,
    pub checksum: u32,
}

impl SectionDescriptor {
    /// Builds a descriptor with `checksum` left at 0; call `encode` to
    /// compute the real checksum once `next_offset`/`size` are final.
    pub fn new(section_type: &str, next_offset: u64, size: u64) -> Self {
        Self {
            section_type: section_type.to_string(),
            next_offset,
            size,
            checksum: 0,
        }
    }

    /// Encodes the descriptor, computing and storing the Adler-32 checksum
    /// over bytes `[0, 72)` as it does so.
    pub fn encode(&self) -> [u8; SECTION_DESCRIPTOR_SIZE] {
        let mut buf = [0u8; SECTION_DESCRIPTOR_SIZE];
        buf[0..16].copy_from_slice(&encode_section_type(&self.section_type));
        write_u64_le(&mut buf, 16, self.next_offset);
        write_u64_le(&mut buf, 24, self.size);
        // bytes [32, 72) stay reserved/zero.
        let checksum = adler32(&buf[0..SECTION_DESCRIPTOR_CHECKSUM_OFFSET]);
        write_u32_le(&mut buf, SECTION_DESCRIPTOR_CHECKSUM_OFFSET, checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SECTION_DESCRIPTOR_SIZE {
            return Err(EwfError::TruncatedChain);
        }
        let section_type = decode_section_type(&buf[0..16]);
        let next_offset = read_u64_le(buf, 16);
        let size = read_u64_le(buf, 24);
        let checksum = read_u32_le(buf, SECTION_DESCRIPTOR_CHECKSUM_OFFSET);
        Ok(Self {
            section_type,
            next_offset,
            size,
            checksum,
        })
    }

    /// Recomputes the checksum a decoded descriptor *should* have, for
    /// strict-mode verification.
    pub fn expected_checksum(buf: &[u8]) -> u32 {
        adler32(&buf[0..SECTION_DESCRIPTOR_CHECKSUM_OFFSET])
    }
}

bitflags! {
    /// Media flags from the volume descriptor (offset 36).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MediaFlags: u32 {
        const IMAGE = 0x1;
        const PHYSICAL = 0x2;
        const FASTBLOCK_WRITE_BLOCKER = 0x4;
        const TABLEAU_WRITE_BLOCKER = 0x8;
    }
}

/// Media type (volume descriptor byte 0, stored as a 4-byte LE value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    RemovableDisk,
    FixedDisk,
    OpticalDisk,
    Lvf,
    Memory,
    Unknown(u32),
}

impl From<u32> for MediaType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::RemovableDisk,
            1 => Self::FixedDisk,
            2 => Self::OpticalDisk,
            3 => Self::Lvf,
            4 => Self::Memory,
            other => Self::Unknown(other),
        }
    }
}

impl From<MediaType> for u32 {
    fn from(value: MediaType) -> Self {
        match value {
            MediaType::RemovableDisk => 0,
            MediaType::FixedDisk => 1,
            MediaType::OpticalDisk => 2,
            MediaType::Lvf => 3,
            MediaType::Memory => 4,
            MediaType::Unknown(v) => v,
        }
    }
}

/// Compression level (volume descriptor byte 52).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Best,
}

impl From<u8> for CompressionLevel {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Fast,
            2 => Self::Best,
            _ => Self::None,
        }
    }
}

/// The volume/disk descriptor: 94 bytes, carries media geometry and the
/// chunk-size-determining fields.
///
/// Offsets: `media_type`@0, `number_of_chunks`@4, `sectors_per_chunk`@8,
/// `bytes_per_sector`@12, `number_of_sectors`@16, CHS@24..36, `media_flags`
/// @36, `compression_level`@52, `checksum`@90. The byte ranges in between are
/// reserved. `compression_level`'s exact offset is recorded in DESIGN.md;
/// 52 matches the position used by the wider EWF family this format
/// belongs to.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub media_type: MediaType,
    pub number_of_chunks: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub number_of_sectors: u64,
    pub chs_cylinders: u32,
    pub chs_heads: u32,
    pub chs_sectors: u32,
    pub media_flags: MediaFlags,
    pub compression_level: CompressionLevel,
    pub checksum: u32,
}

impl VolumeDescriptor {
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    pub fn encode(&self) -> [u8; VOLUME_DESCRIPTOR_SIZE] {
        let mut buf = [0u8; VOLUME_DESCRIPTOR_SIZE];
        write_u32_le(&mut buf, 0, self.media_type.into());
        write_u32_le(&mut buf, 4, self.number_of_chunks);
        write_u32_le(&mut buf, 8, self.sectors_per_chunk);
        write_u32_le(&mut buf, 12, self.bytes_per_sector);
        write_u64_le(&mut buf, 16, self.number_of_sectors);
        write_u32_le(&mut buf, 24, self.chs_cylinders);
        write_u32_le(&mut buf, 28, self.chs_heads);
        write_u32_le(&mut buf, 32, self.chs_sectors);
        write_u32_le(&mut buf, 36, self.media_flags.bits());
        buf[52] = match self.compression_level {
            CompressionLevel::None => 0,
            CompressionLevel::Fast => 1,
            CompressionLevel::Best => 2,
        };
        let checksum = adler32(&buf[0..VOLUME_DESCRIPTOR_CHECKSUM_OFFSET]);
        write_u32_le(&mut buf, VOLUME_DESCRIPTOR_CHECKSUM_OFFSET, checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < VOLUME_DESCRIPTOR_SIZE {
            return Err(EwfError::MalformedTable {
                offset: 0,
                reason: "volume descriptor truncated".to_string(),
            });
        }
        Ok(Self {
            media_type: read_u32_le(buf, 0).into(),
            number_of_chunks: read_u32_le(buf, 4),
            sectors_per_chunk: read_u32_le(buf, 8),
            bytes_per_sector: read_u32_le(buf, 12),
            number_of_sectors: read_u64_le(buf, 16),
            chs_cylinders: read_u32_le(buf, 24),
            chs_heads: read_u32_le(buf, 28),
            chs_sectors: read_u32_le(buf, 32),
            media_flags: MediaFlags::from_bits_truncate(read_u32_le(buf, 36)),
            compression_level: buf[52].into(),
            checksum: read_u32_le(buf, VOLUME_DESCRIPTOR_CHECKSUM_OFFSET),
        })
    }

    pub fn expected_checksum(buf: &[u8]) -> u32 {
        adler32(&buf[0..VOLUME_DESCRIPTOR_CHECKSUM_OFFSET])
    }
}

/// Decoded fields of a table header, minus the entry array itself.
#[derive(Debug, Clone, Copy)]
pub struct TableHeaderMeta {
    pub number_of_entries: u64,
    pub base_offset: u64,
    pub checksum: u32,
}

impl TableHeaderMeta {
    pub fn encode(&self) -> [u8; TABLE_HEADER_FIXED_SIZE] {
        let mut buf = [0u8; TABLE_HEADER_FIXED_SIZE];
        write_u64_le(&mut buf, 0, self.number_of_entries);
        write_u64_le(&mut buf, 8, self.base_offset);
        // bytes [16, 20) reserved/zero.
        let checksum = adler32(&buf[0..TABLE_HEADER_CHECKSUM_OFFSET]);
        write_u32_le(&mut buf, TABLE_HEADER_CHECKSUM_OFFSET, checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < TABLE_HEADER_FIXED_SIZE {
            return Err(EwfError::MalformedTable {
                offset: 0,
                reason: "table header truncated".to_string(),
            });
        }
        Ok(Self {
            number_of_entries: read_u64_le(buf, 0),
            base_offset: read_u64_le(buf, 8),
            checksum: read_u32_le(buf, TABLE_HEADER_CHECKSUM_OFFSET),
        })
    }

    pub fn expected_checksum(buf: &[u8]) -> u32 {
        adler32(&buf[0..TABLE_HEADER_CHECKSUM_OFFSET])
    }
}

/// Bit 31 of a table entry: set when the chunk payload is zlib-compressed.
pub const TABLE_ENTRY_COMPRESSED_FLAG: u32 = 0x8000_0000;
/// Mask isolating the 31-bit relative offset of a table entry.
pub const TABLE_ENTRY_OFFSET_MASK: u32 = 0x7FFF_FFFF;

/// Packs a relative offset and compressed flag into a table entry.
pub fn encode_table_entry(relative_offset: u32, compressed: bool) -> u32 {
    assert!(
        relative_offset & TABLE_ENTRY_COMPRESSED_FLAG == 0,
        "relative offset does not fit in 31 bits"
    );
    if compressed {
        relative_offset | TABLE_ENTRY_COMPRESSED_FLAG
    } else {
        relative_offset
    }
}

/// Unpacks a table entry into `(relative_offset, compressed)`.
pub fn decode_table_entry(entry: u32) -> (u32, bool) {
    (
        entry & TABLE_ENTRY_OFFSET_MASK,
        entry & TABLE_ENTRY_COMPRESSED_FLAG != 0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_round_trips() {
        let header = FileHeaderV1::new(1);
        let encoded = header.encode();
        let decoded = FileHeaderV1::decode(&encoded).unwrap();
        assert_eq!(decoded.segment_number, 1);
    }

    #[test]
    fn file_header_rejects_bad_signature() {
        let mut bytes = FileHeaderV1::new(1).encode();
        bytes[0] = b'X';
        assert!(matches!(
            FileHeaderV1::decode(&bytes),
            Err(EwfError::SignatureMismatch)
        ));
    }

    #[test]
    fn file_header_recognizes_v2_magic() {
        let mut bytes = [0u8; FILE_HEADER_V1_SIZE];
        bytes[0..8].copy_from_slice(&MAGIC_V2);
        assert!(matches!(
            FileHeaderV1::decode(&bytes),
            Err(EwfError::UnsupportedVersion)
        ));
    }

    #[test]
    fn section_descriptor_checksum_is_self_consistent() {
        let descriptor = SectionDescriptor::new(section_type::TABLE, 1234, 99);
        let encoded = descriptor.encode();
        let decoded = SectionDescriptor::decode(&encoded).unwrap();
        assert_eq!(decoded.section_type, "table");
        assert_eq!(decoded.next_offset, 1234);
        assert_eq!(decoded.checksum, SectionDescriptor::expected_checksum(&encoded));
    }

    #[test]
    fn table_entry_roundtrip() {
        let entry = encode_table_entry(12345, true);
        let (offset, compressed) = decode_table_entry(entry);
        assert_eq!(offset, 12345);
        assert!(compressed);

        let entry = encode_table_entry(54321, false);
        let (offset, compressed) = decode_table_entry(entry);
        assert_eq!(offset, 54321);
        assert!(!compressed);
    }

    #[test]
    fn volume_descriptor_round_trips() {
        let vol = VolumeDescriptor {
            media_type: MediaType::FixedDisk,
            number_of_chunks: 10,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            number_of_sectors: 640,
            chs_cylinders: 0,
            chs_heads: 0,
            chs_sectors: 0,
            media_flags: MediaFlags::IMAGE,
            compression_level: CompressionLevel::Best,
            checksum: 0,
        };
        let encoded = vol.encode();
        let decoded = VolumeDescriptor::decode(&encoded).unwrap();
        assert_eq!(decoded.number_of_chunks, 10);
        assert_eq!(decoded.chunk_size(), 64 * 512);
        assert_eq!(decoded.media_flags, MediaFlags::IMAGE);
        assert_eq!(decoded.compression_level, CompressionLevel::Best);
        assert_eq!(decoded.checksum, VolumeDescriptor::expected_checksum(&encoded));
    }
}
