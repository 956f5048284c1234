//! # File Header and Field Descriptor Codec
//!
//! This module provides zerocopy-based structs for the two fixed 32-byte
//! layouts of an xBase table file: the file header at offset 0 and the field
//! descriptors that follow it.
//!
//! ## File Layout
//!
//! ```text
//! +----------------------+
//! | File header (32B)    |  version, update date, counts, language driver
//! +----------------------+
//! | Descriptor 0 (32B)   |  one per field
//! | ...                  |
//! | Descriptor n-1 (32B) |
//! +----------------------+
//! | 0x0D terminator (1B) |
//! +----------------------+
//! | Record 0             |  record_length bytes each, byte 0 = deletion flag
//! | ...                  |
//! +----------------------+
//! | 0x1A EOF marker (1B) |  optional, ignored by readers
//! +----------------------+
//! ```
//!
//! ## File Header Format
//!
//! ```text
//! Offset  Size  Description
//! 0       1     Version (0x03)
//! 1       3     Update date: year-1900, month, day
//! 4       4     Record count (LE; bit 31 masked on read)
//! 8       2     Header length (LE)
//! 10      2     Record length (LE)
//! 12      17    Reserved
//! 29      1     Language driver (LDID)
//! 30      2     Reserved
//! ```
//!
//! ## Field Descriptor Format
//!
//! ```text
//! Offset  Size  Description
//! 0       11    Field name, NUL padded
//! 11      1     Native type code ('C', 'N', 'F', 'D', 'L', 'M', ...)
//! 12      4     Reserved
//! 16      1     Width (for 'C': low byte of a 16-bit LE width)
//! 17      1     Decimal count (for 'C': high byte of the width)
//! 18      14    Reserved
//! ```
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian; the zerocopy
//! `U16<LittleEndian>`/`U32<LittleEndian>` types handle conversion.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::schema::FieldType;

pub const FILE_HEADER_SIZE: usize = 32;
pub const FIELD_DESCRIPTOR_SIZE: usize = 32;

pub const TABLE_VERSION: u8 = 0x03;
pub const HEADER_TERMINATOR: u8 = 0x0D;
pub const END_OF_FILE_CHAR: u8 = 0x1A;

pub const DELETED_FLAG: u8 = b'*';
pub const LIVE_FLAG: u8 = b' ';

/// Longest field name accepted when reading a descriptor.
pub const FIELD_NAME_LEN_READ: usize = 11;
/// Longest field name emitted when writing a descriptor.
pub const FIELD_NAME_LEN_WRITE: usize = 10;

pub const MAX_FIELD_WIDTH: u16 = 255;
pub const MAX_HEADER_LENGTH: u32 = 65535;
pub const MAX_RECORD_LENGTH: u32 = 65535;
/// (65535 - 32 - 1) / 32, the most descriptors a header can carry.
pub const MAX_FIELD_COUNT: usize = 2046;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    version: u8,
    update_year: u8,
    update_month: u8,
    update_day: u8,
    record_count: U32,
    header_length: U16,
    record_length: U16,
    reserved: [u8; 17],
    language_driver: u8,
    reserved_tail: [u8; 2],
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new(header_length: u16, record_length: u16, language_driver: u8) -> Self {
        Self {
            version: TABLE_VERSION,
            update_year: 0,
            update_month: 0,
            update_day: 0,
            record_count: U32::new(0),
            header_length: U16::new(header_length),
            record_length: U16::new(record_length),
            reserved: [0u8; 17],
            language_driver,
            reserved_tail: [0u8; 2],
        }
    }

    /// Parses and validates a header read from offset 0 of a table file.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for file header: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse file header: {:?}", e))?;

        ensure!(header.record_length.get() != 0, "record length is zero");
        ensure!(
            header.header_length.get() as usize >= FILE_HEADER_SIZE,
            "header length {} shorter than the file header itself",
            header.header_length.get()
        );

        Ok(header)
    }

    /// Parses a mutable view, used when patching the date and record count in
    /// place without disturbing the reserved bytes.
    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for file header: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse file header: {:?}", e))
    }

    /// Record count. Some producers set the top bit of the high byte, so it
    /// is masked off.
    pub fn record_count(&self) -> u32 {
        self.record_count.get() & 0x7FFF_FFFF
    }

    pub fn set_record_count(&mut self, count: u32) {
        self.record_count = U32::new(count);
    }

    pub fn header_length(&self) -> u16 {
        self.header_length.get()
    }

    pub fn record_length(&self) -> u16 {
        self.record_length.get()
    }

    /// Update date as stored: years since 1900, month, day.
    pub fn update_date(&self) -> (u8, u8, u8) {
        (self.update_year, self.update_month, self.update_day)
    }

    pub fn set_update_date(&mut self, year_since_1900: u8, month: u8, day: u8) {
        self.update_year = year_since_1900;
        self.update_month = month;
        self.update_day = day;
    }

    pub fn language_driver(&self) -> u8 {
        self.language_driver
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FieldDescriptor {
    name: [u8; 11],
    type_code: u8,
    reserved: [u8; 4],
    width: u8,
    decimals: u8,
    reserved_tail: [u8; 14],
}

const _: () = assert!(std::mem::size_of::<FieldDescriptor>() == FIELD_DESCRIPTOR_SIZE);

impl FieldDescriptor {
    /// Builds a descriptor for writing. The name is truncated to 10 bytes;
    /// character fields spread their width over the width/decimals pair.
    pub fn new(name: &str, field_type: FieldType, width: u16, decimals: u8) -> Self {
        let mut name_bytes = [0u8; 11];
        let truncated = &name.as_bytes()[..name.len().min(FIELD_NAME_LEN_WRITE)];
        name_bytes[..truncated.len()].copy_from_slice(truncated);

        let (width_byte, decimals_byte) = if field_type == FieldType::Character {
            let le = width.to_le_bytes();
            (le[0], le[1])
        } else {
            (width as u8, decimals)
        };

        Self {
            name: name_bytes,
            type_code: field_type.code(),
            reserved: [0u8; 4],
            width: width_byte,
            decimals: decimals_byte,
            reserved_tail: [0u8; 14],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FIELD_DESCRIPTOR_SIZE,
            "buffer too small for field descriptor: {} < {}",
            bytes.len(),
            FIELD_DESCRIPTOR_SIZE
        );
        Self::ref_from_bytes(&bytes[..FIELD_DESCRIPTOR_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse field descriptor: {:?}", e))
    }

    /// Field name with NUL padding and trailing spaces removed.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end])
            .trim_end_matches(' ')
            .to_string()
    }

    pub fn field_type(&self) -> FieldType {
        FieldType::from_code(self.type_code)
    }

    /// Field width. Character fields store it little-endian across the
    /// width/decimals bytes.
    pub fn width(&self) -> u16 {
        if self.field_type() == FieldType::Character {
            u16::from_le_bytes([self.width, self.decimals])
        } else {
            self.width as u16
        }
    }

    /// Decimal count; only meaningful for numeric types.
    pub fn decimals(&self) -> u8 {
        match self.field_type() {
            FieldType::Numeric | FieldType::Float => self.decimals,
            _ => 0,
        }
    }
}
