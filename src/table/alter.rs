//! Schema mutation: add, delete, reorder and alter fields.
//!
//! Every operation follows the same shape: flush the buffered record, build
//! the complete replacement schema and descriptor image in side buffers,
//! rewrite the stored records in whichever order keeps unread bytes intact,
//! refresh the header and invalidate the record cache. A failure mid-rewrite
//! leaves the file readable but possibly stale; the caller is expected to
//! discard the handle.
//!
//! Rewrite order matters because records move within the same file:
//!
//! | Operation      | Record shift        | Order          |
//! |----------------|---------------------|----------------|
//! | add field      | toward the end      | last to first  |
//! | delete field   | toward the start    | first to last  |
//! | reorder fields | in place            | first to last  |
//! | alter, shrink  | toward the start    | first to last  |
//! | alter, grow    | toward the end      | last to first  |

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::header::{
    FieldDescriptor, FIELD_DESCRIPTOR_SIZE, MAX_FIELD_WIDTH, MAX_HEADER_LENGTH, MAX_RECORD_LENGTH,
};
use crate::schema::{FieldDef, FieldType};
use crate::value::is_null_bytes;

use super::DbfTable;

impl DbfTable {
    /// Appends a field to the schema, returning its index. Existing records
    /// are rewritten with the new field set to its type's NULL sentinel.
    pub fn add_field(
        &mut self,
        name: &str,
        field_type: FieldType,
        width: u16,
        decimals: u8,
    ) -> Result<usize> {
        self.flush_record()?;

        if self.header_length + FIELD_DESCRIPTOR_SIZE as u32 > MAX_HEADER_LENGTH {
            let message = format!(
                "Cannot add field {}. Header length limit reached (max 65535 bytes, 2046 fields).",
                name
            );
            self.report_error(&message);
            bail!(message);
        }
        ensure!(width >= 1, "field width must be at least 1");
        let width = width.min(MAX_FIELD_WIDTH);
        if self.record_length as u32 + width as u32 > MAX_RECORD_LENGTH {
            let message = format!(
                "Cannot add field {}. Record length limit reached (max 65535 bytes).",
                name
            );
            self.report_error(&message);
            bail!(message);
        }

        let old_record_length = self.record_length as usize;
        let old_header_length = self.header_length as u64;

        let descriptor = FieldDescriptor::new(name, field_type, width, decimals);
        self.schema.push_field(
            FieldDef::new(name.to_string(), field_type, width, decimals),
            self.record_length,
        );
        self.descriptor_image
            .extend_from_slice(zerocopy::IntoBytes::as_bytes(&descriptor));
        self.record_length += width;
        self.header_length += FIELD_DESCRIPTOR_SIZE as u32;
        self.record_buf.resize(self.record_length as usize, b' ');
        self.updated = false;

        let index = self.schema.field_count() - 1;
        if self.no_header {
            // Header not on disk yet; nothing to shift.
            return Ok(index);
        }

        // Shift records toward the end, newest first, so every source byte is
        // read before anything overwrites it.
        let fill = field_type.null_fill();
        let mut record = vec![0u8; self.record_length as usize];
        for i in (0..self.record_count as usize).rev() {
            let old_offset = old_header_length + (i * old_record_length) as u64;
            self.file.seek(old_offset)?;
            self.file.read_exact(&mut record[..old_record_length])?;
            record[old_record_length..].fill(fill);

            let new_offset = self.record_offset(i);
            self.file.seek(new_offset)?;
            self.file.write_all(&record)?;
        }
        self.write_eof_marker()?;

        // The header grew: rewrite it wholesale, then patch the counts.
        self.no_header = true;
        self.update_header()?;

        self.invalidate_record_cache();
        self.updated = true;
        Ok(index)
    }

    /// Removes field `field` from the schema and closes the gap in every
    /// record. The file is not shortened; the record count bounds readers.
    pub fn delete_field(&mut self, field: usize) -> Result<()> {
        ensure!(
            field < self.schema.field_count(),
            "field index {} out of range ({} fields)",
            field,
            self.schema.field_count()
        );
        self.flush_record()?;

        let old_record_length = self.record_length as usize;
        let old_header_length = self.header_length as u64;
        let removed = self.schema.remove_field(field);
        let deleted_offset = removed.offset() as usize;
        let deleted_width = removed.width() as usize;

        let start = field * FIELD_DESCRIPTOR_SIZE;
        self.descriptor_image
            .drain(start..start + FIELD_DESCRIPTOR_SIZE);
        self.header_length -= FIELD_DESCRIPTOR_SIZE as u32;
        self.record_length -= deleted_width as u16;
        self.record_buf.truncate(self.record_length as usize);

        if self.no_header && self.record_count == 0 {
            return Ok(());
        }

        // Header shrank: rewrite it before the records slide forward over
        // the old descriptor space.
        self.no_header = true;
        self.update_header()?;

        let mut record = vec![0u8; old_record_length];
        for i in 0..self.record_count as usize {
            let old_offset = old_header_length + (i * old_record_length) as u64;
            self.file.seek(old_offset)?;
            self.file.read_exact(&mut record)?;

            let new_offset = self.record_offset(i);
            self.file.seek(new_offset)?;
            // Two writes per record: the bytes before the field, then the
            // bytes after it.
            self.file.write_all(&record[..deleted_offset])?;
            self.file
                .write_all(&record[deleted_offset + deleted_width..])?;
        }
        self.write_eof_marker()?;
        // TODO: truncate the file to its new length; until then the stale
        // tail bytes are unreachable through the record count.

        self.invalidate_record_cache();
        self.updated = true;
        Ok(())
    }

    /// Rearranges the fields into `order`, which must be a permutation of
    /// `0..field_count`. Records are reassembled in place.
    pub fn reorder_fields(&mut self, order: &[usize]) -> Result<()> {
        let count = self.schema.field_count();
        if count == 0 {
            return Ok(());
        }
        ensure!(
            order.len() == count,
            "field order lists {} entries for {} fields",
            order.len(),
            count
        );
        let mut seen: SmallVec<[bool; 32]> = smallvec::smallvec![false; count];
        for &source in order {
            ensure!(
                source < count && !seen[source],
                "field order is not a permutation of 0..{}",
                count
            );
            seen[source] = true;
        }

        self.flush_record()?;

        // Build the replacement schema and descriptor image before touching
        // the live ones.
        let old_layout: Vec<(usize, usize)> = self
            .schema
            .fields()
            .iter()
            .map(|f| (f.offset() as usize, f.width() as usize))
            .collect();
        let mut fields = Vec::with_capacity(count);
        let mut image = Vec::with_capacity(self.descriptor_image.len());
        for &source in order {
            fields.push(self.schema.fields()[source].clone());
            let at = source * FIELD_DESCRIPTOR_SIZE;
            image.extend_from_slice(&self.descriptor_image[at..at + FIELD_DESCRIPTOR_SIZE]);
        }
        self.schema.set_fields(fields)?;
        self.descriptor_image = image;

        if !(self.no_header && self.record_count == 0) {
            self.no_header = true;
            self.update_header()?;

            let mut record = vec![0u8; self.record_length as usize];
            let mut shuffled = vec![0u8; self.record_length as usize];
            for i in 0..self.record_count as usize {
                let offset = self.record_offset(i);
                self.file.seek(offset)?;
                self.file.read_exact(&mut record)?;

                // Start from the original bytes so the deletion flag and any
                // padding survive, then place each field at its new offset.
                shuffled.copy_from_slice(&record);
                for (target, &source) in order.iter().enumerate() {
                    let (source_offset, width) = old_layout[source];
                    let target_offset = self.schema.fields()[target].offset() as usize;
                    shuffled[target_offset..target_offset + width]
                        .copy_from_slice(&record[source_offset..source_offset + width]);
                }

                self.file.seek(offset)?;
                self.file.write_all(&shuffled)?;
            }
        }

        self.invalidate_record_cache();
        self.updated = true;
        Ok(())
    }

    /// Changes name, type, width and decimals of field `field`, rewriting
    /// every record when the width changes.
    pub fn alter_field(
        &mut self,
        field: usize,
        name: &str,
        field_type: FieldType,
        width: u16,
        decimals: u8,
    ) -> Result<()> {
        ensure!(
            field < self.schema.field_count(),
            "field index {} out of range ({} fields)",
            field,
            self.schema.field_count()
        );
        self.flush_record()?;

        ensure!(width >= 1, "field width must be at least 1");
        let width = width.min(MAX_FIELD_WIDTH);

        let old_def = self.schema.field(field).unwrap();
        let old_type = old_def.field_type();
        let old_width = old_def.width() as usize;
        let offset = old_def.offset() as usize;
        let old_record_length = self.record_length as usize;
        let new_record_length =
            old_record_length as u32 + width as u32 - old_width as u32;
        ensure!(
            new_record_length <= MAX_RECORD_LENGTH,
            "record length limit reached (max 65535 bytes)"
        );
        let fill = field_type.null_fill();

        self.schema.replace_field(
            field,
            FieldDef::new(name.to_string(), field_type, width, decimals),
        );
        let descriptor = FieldDescriptor::new(name, field_type, width, decimals);
        let at = field * FIELD_DESCRIPTOR_SIZE;
        self.descriptor_image[at..at + FIELD_DESCRIPTOR_SIZE]
            .copy_from_slice(zerocopy::IntoBytes::as_bytes(&descriptor));

        let width = width as usize;
        self.record_length = new_record_length as u16;
        self.record_buf.resize(self.record_length as usize, b' ');

        if self.no_header && self.record_count == 0 {
            return Ok(());
        }

        self.no_header = true;
        self.update_header()?;

        if width < old_width || (width == old_width && field_type != old_type) {
            self.rewrite_shrunk_field(offset, old_width, width, old_type, fill, old_record_length)?;
        } else if width > old_width {
            self.rewrite_grown_field(offset, old_width, width, old_type, fill, old_record_length)?;
        }

        self.invalidate_record_cache();
        self.updated = true;
        Ok(())
    }

    /// Front-to-back rewrite for a narrowed (or retyped, same-width) field.
    fn rewrite_shrunk_field(
        &mut self,
        offset: usize,
        old_width: usize,
        new_width: usize,
        old_type: FieldType,
        fill: u8,
        old_record_length: usize,
    ) -> Result<()> {
        let mut record = vec![0u8; old_record_length];
        let mut old_field: SmallVec<[u8; 256]> = SmallVec::new();

        for i in 0..self.record_count as usize {
            let old_offset = self.header_length as u64 + (i * old_record_length) as u64;
            self.file.seek(old_offset)?;
            self.file.read_exact(&mut record)?;

            old_field.clear();
            old_field.extend_from_slice(&record[offset..offset + old_width]);
            let was_null = is_null_bytes(old_type, &old_field);

            if new_width != old_width {
                if old_type.right_aligned() {
                    // Right-aligned values truncate from the left, so the
                    // least significant bytes survive.
                    record.copy_within(offset + old_width - new_width..offset + old_width, offset);
                }
                record.copy_within(offset + old_width..old_record_length, offset + new_width);
            }
            if was_null {
                record[offset..offset + new_width].fill(fill);
            }

            let new_offset = self.record_offset(i);
            self.file.seek(new_offset)?;
            self.file.write_all(&record[..self.record_length as usize])?;
        }

        // TODO: truncate the file to its new length.
        self.write_eof_marker()
    }

    /// Back-to-front rewrite for a widened field.
    fn rewrite_grown_field(
        &mut self,
        offset: usize,
        old_width: usize,
        new_width: usize,
        old_type: FieldType,
        fill: u8,
        old_record_length: usize,
    ) -> Result<()> {
        let mut record = vec![0u8; self.record_length as usize];

        for i in (0..self.record_count as usize).rev() {
            let old_offset = self.header_length as u64 + (i * old_record_length) as u64;
            self.file.seek(old_offset)?;
            self.file.read_exact(&mut record[..old_record_length])?;

            let was_null = is_null_bytes(old_type, &record[offset..offset + old_width]);

            // Push the suffix right to open the gap.
            record.copy_within(offset + old_width..old_record_length, offset + new_width);

            if was_null {
                record[offset..offset + new_width].fill(fill);
            } else if old_type.is_numeric() {
                // Keep numbers right-aligned: digits slide to the tail,
                // spaces pad the front.
                record.copy_within(offset..offset + old_width, offset + new_width - old_width);
                record[offset..offset + new_width - old_width].fill(b' ');
            } else {
                record[offset + old_width..offset + new_width].fill(b' ');
            }

            let new_offset = self.record_offset(i);
            self.file.seek(new_offset)?;
            self.file.write_all(&record)?;
        }

        self.write_eof_marker()
    }
}
