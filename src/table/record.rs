//! Record cache and typed attribute access.
//!
//! One record is buffered at a time. Reads of any field load that record's
//! bytes (flushing a dirty predecessor first); writes mutate the buffer and
//! mark it dirty, leaving the actual file write to the next record switch,
//! header refresh or close. Writing to index `record_count` appends a fresh
//! all-space record.

use eyre::{bail, ensure, Result};

use crate::header::{DELETED_FLAG, END_OF_FILE_CHAR, LIVE_FLAG};
use crate::schema::FieldType;
use crate::value::{format_numeric, is_null_bytes, Date, WriteOutcome};

use super::DbfTable;

impl DbfTable {
    /// Writes the buffered record back if dirty. Skips the positioning seek
    /// when the stream is already at the target and no read intervened since
    /// the last write.
    pub(crate) fn flush_record(&mut self) -> Result<()> {
        if !self.current_record_modified {
            return Ok(());
        }
        let Some(record) = self.current_record else {
            return Ok(());
        };
        self.current_record_modified = false;

        let offset = self.record_offset(record);
        let at_target = !self.require_next_write_seek
            && self.file.tell().map(|pos| pos == offset).unwrap_or(false);
        if !at_target {
            if let Err(err) = self.file.seek(offset) {
                let message = format!(
                    "Failure seeking to position before writing DBF record {}.",
                    record
                );
                self.report_error(&message);
                return Err(err.wrap_err(message));
            }
        }

        if let Err(err) = self.file.write_all(&self.record_buf) {
            let message = format!("Failure writing DBF record {}.", record);
            self.report_error(&message);
            return Err(err.wrap_err(message));
        }
        self.require_next_write_seek = false;

        if record + 1 == self.record_count as usize && self.write_eof_char {
            let _ = self.file.write(&[END_OF_FILE_CHAR]);
        }
        Ok(())
    }

    /// Makes `record` the buffered record, flushing the previous one.
    pub(crate) fn load_record(&mut self, record: usize) -> Result<()> {
        if self.current_record == Some(record) {
            return Ok(());
        }
        self.flush_record()?;

        let offset = self.record_offset(record);
        if let Err(err) = self.file.seek(offset) {
            let message = format!("fseek({}) failed on DBF file.", offset);
            self.report_error(&message);
            return Err(err.wrap_err(message));
        }
        if let Err(err) = self.file.read_exact(&mut self.record_buf) {
            let message = format!("fread({}) failed on DBF file.", self.record_length);
            self.report_error(&message);
            return Err(err.wrap_err(message));
        }

        self.current_record = Some(record);
        // Mixed read/write traffic must not reuse a stale position.
        self.require_next_write_seek = true;
        Ok(())
    }

    /// Loads `record` and copies field `field`'s bytes into the work buffer.
    fn extract_field(&mut self, record: usize, field: usize) -> Result<()> {
        ensure!(
            record < self.record_count as usize,
            "record index {} out of range ({} records)",
            record,
            self.record_count
        );
        let Some(def) = self.schema.field(field) else {
            bail!(
                "field index {} out of range ({} fields)",
                field,
                self.schema.field_count()
            );
        };
        let range = def.byte_range();

        self.load_record(record)?;
        self.work_field.clear();
        let bytes = &self.record_buf[range];
        self.work_field.extend_from_slice(bytes);
        Ok(())
    }

    /// Validates the target, appends a record when writing one past the end,
    /// loads the record and marks it dirty.
    fn prepare_write(&mut self, record: usize, field: Option<usize>) -> Result<()> {
        ensure!(
            record <= self.record_count as usize,
            "record index {} out of range ({} records)",
            record,
            self.record_count
        );
        if let Some(field) = field {
            ensure!(
                field < self.schema.field_count(),
                "field index {} out of range ({} fields)",
                field,
                self.schema.field_count()
            );
        }

        if self.no_header {
            self.write_header()?;
        }

        if record == self.record_count as usize {
            self.flush_record()?;
            self.record_count += 1;
            self.record_buf.fill(b' ');
            self.current_record = Some(record);
        }

        self.load_record(record)?;
        self.current_record_modified = true;
        self.updated = true;
        Ok(())
    }

    /// Reads a field as text. With the `trim-strings` feature, surrounding
    /// spaces are stripped.
    pub fn read_string(&mut self, record: usize, field: usize) -> Result<String> {
        self.extract_field(record, field)?;
        let mut bytes: &[u8] = &self.work_field;
        #[cfg(feature = "trim-strings")]
        {
            bytes = crate::value::trim_spaces(bytes);
        }
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Reads a field as a double through the hook-provided parse.
    pub fn read_double(&mut self, record: usize, field: usize) -> Result<f64> {
        self.extract_field(record, field)?;
        let text = String::from_utf8_lossy(&self.work_field);
        Ok(self.hooks.atof(&text))
    }

    /// Reads a field as an integer: double parse, then truncation.
    pub fn read_integer(&mut self, record: usize, field: usize) -> Result<i64> {
        Ok(self.read_double(record, field)? as i64)
    }

    /// Reads a logical field's single character (`'T'`, `'F'`, or the `'?'`
    /// null sentinel).
    pub fn read_logical(&mut self, record: usize, field: usize) -> Result<char> {
        self.extract_field(record, field)?;
        Ok(self.work_field.first().copied().unwrap_or(b' ') as char)
    }

    /// Reads a date field; unparsable or null content yields the zero date.
    pub fn read_date(&mut self, record: usize, field: usize) -> Result<Date> {
        self.extract_field(record, field)?;
        Ok(Date::parse(&self.work_field))
    }

    /// True when the field holds its type's NULL representation.
    pub fn is_null(&mut self, record: usize, field: usize) -> Result<bool> {
        self.extract_field(record, field)?;
        let field_type = self.schema.field(field).unwrap().field_type();
        Ok(is_null_bytes(field_type, &self.work_field))
    }

    /// Writes a double into a numeric or float field, formatted to the
    /// field's width and decimal count. Date fields take [`Self::write_date`].
    pub fn write_double(&mut self, record: usize, field: usize, value: f64) -> Result<WriteOutcome> {
        self.prepare_write(record, Some(field))?;

        let def = self.schema.field(field).unwrap();
        match def.field_type() {
            FieldType::Numeric | FieldType::Float => {
                let width = def.width() as usize;
                let decimals = def.decimals() as usize;
                let range = def.byte_range();

                let mut text = format_numeric(value, width, decimals);
                let mut outcome = WriteOutcome::Stored;
                if text.len() > width {
                    text.truncate(width);
                    if self.hooks.atof(&text) != value {
                        outcome = WriteOutcome::Truncated;
                    }
                }
                self.record_buf[range][..text.len()].copy_from_slice(text.as_bytes());
                Ok(outcome)
            }
            other => bail!(
                "cannot write a number to a field of type '{}'",
                other.code() as char
            ),
        }
    }

    /// Writes an integer; stored through the double formatter.
    pub fn write_integer(
        &mut self,
        record: usize,
        field: usize,
        value: i64,
    ) -> Result<WriteOutcome> {
        self.write_double(record, field, value as f64)
    }

    /// Writes a string, left-aligned and space-padded; longer input is
    /// truncated at the field width.
    pub fn write_string(
        &mut self,
        record: usize,
        field: usize,
        value: &str,
    ) -> Result<WriteOutcome> {
        self.prepare_write(record, Some(field))?;

        let def = self.schema.field(field).unwrap();
        let width = def.width() as usize;
        let range = def.byte_range();
        let bytes = value.as_bytes();

        let (copy_len, outcome) = if bytes.len() > width {
            (width, WriteOutcome::Truncated)
        } else {
            self.record_buf[range.clone()].fill(b' ');
            (bytes.len(), WriteOutcome::Stored)
        };
        self.record_buf[range][..copy_len].copy_from_slice(&bytes[..copy_len]);
        Ok(outcome)
    }

    /// Writes `'T'` or `'F'` into a logical field. Any other value leaves the
    /// field untouched and fails.
    pub fn write_logical(&mut self, record: usize, field: usize, value: char) -> Result<()> {
        self.prepare_write(record, Some(field))?;

        let def = self.schema.field(field).unwrap();
        ensure!(
            def.field_type() == FieldType::Logical,
            "field {} is not logical",
            field
        );
        ensure!(
            value == 'T' || value == 'F',
            "logical value must be 'T' or 'F', got '{}'",
            value
        );
        let offset = def.offset() as usize;
        self.record_buf[offset] = value as u8;
        Ok(())
    }

    /// Writes a date as its eight digits. Components outside their digit
    /// budget are rejected; impossible calendar dates are not.
    pub fn write_date(&mut self, record: usize, field: usize, value: &Date) -> Result<()> {
        ensure!(
            value.has_supported_digits(),
            "date {:04}-{:02}-{:02} exceeds the yyyymmdd digit budget",
            value.year,
            value.month,
            value.day
        );
        let text = value.encode();
        self.write_field_raw(record, field, &text)
    }

    /// Writes NULL: fills the field with its type's sentinel byte.
    pub fn write_null(&mut self, record: usize, field: usize) -> Result<()> {
        self.prepare_write(record, Some(field))?;

        let def = self.schema.field(field).unwrap();
        let fill = def.field_type().null_fill();
        let range = def.byte_range();
        self.record_buf[range].fill(fill);
        Ok(())
    }

    /// Writes a field's bytes as-is, without type formatting: shorter input
    /// is space-padded, longer input silently truncated.
    pub fn write_field_raw(&mut self, record: usize, field: usize, value: &[u8]) -> Result<()> {
        self.prepare_write(record, Some(field))?;

        let def = self.schema.field(field).unwrap();
        let width = def.width() as usize;
        let range = def.byte_range();

        let copy_len = if value.len() > width {
            width
        } else {
            self.record_buf[range.clone()].fill(b' ');
            value.len()
        };
        self.record_buf[range][..copy_len].copy_from_slice(&value[..copy_len]);
        Ok(())
    }

    /// Borrows one full record, deletion flag included. Valid until the next
    /// operation on the handle.
    pub fn read_record_raw(&mut self, record: usize) -> Result<&[u8]> {
        ensure!(
            record < self.record_count as usize,
            "record index {} out of range ({} records)",
            record,
            self.record_count
        );
        self.load_record(record)?;
        Ok(&self.record_buf)
    }

    /// Replaces one full record with the given bytes.
    pub fn write_record_raw(&mut self, record: usize, bytes: &[u8]) -> Result<()> {
        ensure!(
            bytes.len() == self.record_length as usize,
            "record must be exactly {} bytes, got {}",
            self.record_length,
            bytes.len()
        );
        self.prepare_write(record, None)?;
        self.record_buf.copy_from_slice(bytes);
        Ok(())
    }

    /// True when the record's deletion flag is set.
    pub fn is_deleted(&mut self, record: usize) -> Result<bool> {
        ensure!(
            record < self.record_count as usize,
            "record index {} out of range ({} records)",
            record,
            self.record_count
        );
        self.load_record(record)?;
        Ok(self.record_buf[0] == DELETED_FLAG)
    }

    /// Sets or clears the deletion flag, dirtying the record only on change.
    pub fn mark_deleted(&mut self, record: usize, deleted: bool) -> Result<()> {
        ensure!(
            record < self.record_count as usize,
            "record index {} out of range ({} records)",
            record,
            self.record_count
        );
        self.load_record(record)?;

        let flag = if deleted { DELETED_FLAG } else { LIVE_FLAG };
        if self.record_buf[0] != flag {
            self.record_buf[0] = flag;
            self.current_record_modified = true;
            self.updated = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hooks::{Access, MemoryHooks};
    use crate::table::DbfTable;

    fn table_with(fields: &[(&str, FieldType, u16, u8)]) -> (DbfTable, Arc<MemoryHooks>) {
        let hooks = Arc::new(MemoryHooks::new());
        let mut table = DbfTable::create_with_hooks("t", Some("LDID/87"), hooks.clone()).unwrap();
        for &(name, field_type, width, decimals) in fields {
            table.add_field(name, field_type, width, decimals).unwrap();
        }
        (table, hooks)
    }

    #[test]
    fn writing_one_past_the_end_appends_a_record() {
        let (mut table, _hooks) = table_with(&[("ID", FieldType::Numeric, 10, 0)]);

        assert_eq!(table.record_count(), 0);
        table.write_integer(0, 0, 42).unwrap();
        assert_eq!(table.record_count(), 1);
        assert_eq!(table.read_integer(0, 0).unwrap(), 42);
    }

    #[test]
    fn writing_far_past_the_end_is_rejected() {
        let (mut table, _hooks) = table_with(&[("ID", FieldType::Numeric, 10, 0)]);
        assert!(table.write_integer(3, 0, 1).is_err());
    }

    #[test]
    fn numeric_values_are_right_aligned() {
        let (mut table, _hooks) = table_with(&[("N", FieldType::Numeric, 10, 0)]);
        table.write_integer(0, 0, 123).unwrap();
        assert_eq!(table.read_string(0, 0).unwrap(), "       123");
    }

    #[test]
    fn numeric_truncation_reports_the_lost_value() {
        let (mut table, _hooks) = table_with(&[("N", FieldType::Numeric, 4, 0)]);

        let exact = table.write_integer(0, 0, 1234).unwrap();
        assert!(exact.is_exact());

        let lost = table.write_integer(0, 0, 123456).unwrap();
        assert_eq!(lost, WriteOutcome::Truncated);
        assert_eq!(table.read_integer(0, 0).unwrap(), 1234);
    }

    #[test]
    fn doubles_keep_their_decimals() {
        let (mut table, _hooks) = table_with(&[("R", FieldType::Numeric, 12, 3)]);
        table.write_double(0, 0, -2.625).unwrap();
        assert_eq!(table.read_string(0, 0).unwrap(), "      -2.625");
        assert_eq!(table.read_double(0, 0).unwrap(), -2.625);
    }

    #[test]
    fn strings_are_left_aligned_and_space_padded() {
        let (mut table, _hooks) = table_with(&[("S", FieldType::Character, 5, 0)]);

        table.write_string(0, 0, "hello").unwrap();
        assert_eq!(table.read_string(0, 0).unwrap(), "hello");

        table.write_string(1, 0, "hi").unwrap();
        assert_eq!(table.read_string(1, 0).unwrap(), "hi   ");
    }

    #[test]
    fn string_overflow_truncates_and_reports_it() {
        let (mut table, _hooks) = table_with(&[("S", FieldType::Character, 5, 0)]);

        let outcome = table.write_string(0, 0, "overlong").unwrap();
        assert_eq!(outcome, WriteOutcome::Truncated);
        assert_eq!(table.read_string(0, 0).unwrap(), "overl");
    }

    #[test]
    fn logical_accepts_only_t_and_f() {
        let (mut table, _hooks) = table_with(&[("L", FieldType::Logical, 1, 0)]);

        table.write_logical(0, 0, 'T').unwrap();
        assert_eq!(table.read_logical(0, 0).unwrap(), 'T');

        assert!(table.write_logical(0, 0, 'x').is_err());
        assert_eq!(table.read_logical(0, 0).unwrap(), 'T');
    }

    #[test]
    fn date_round_trips_and_encodes_eight_digits() {
        let (mut table, _hooks) = table_with(&[("D", FieldType::Date, 8, 0)]);

        table.write_date(0, 0, &Date::new(2024, 3, 7)).unwrap();
        assert_eq!(table.read_string(0, 0).unwrap(), "20240307");
        assert_eq!(table.read_date(0, 0).unwrap(), Date::new(2024, 3, 7));
    }

    #[test]
    fn date_with_too_many_digits_is_rejected() {
        let (mut table, _hooks) = table_with(&[("D", FieldType::Date, 8, 0)]);
        table.write_date(0, 0, &Date::new(2024, 1, 1)).unwrap();
        assert!(table.write_date(0, 0, &Date::new(12345, 1, 1)).is_err());
    }

    #[test]
    fn numeric_writes_to_a_date_field_are_rejected() {
        let (mut table, _hooks) = table_with(&[("D", FieldType::Date, 8, 0)]);
        table.write_date(0, 0, &Date::new(2024, 3, 7)).unwrap();

        assert!(table.write_double(0, 0, 20240307.0).is_err());
        assert!(table.write_integer(0, 0, 20240307).is_err());
        // The stored digits are untouched.
        assert_eq!(table.read_string(0, 0).unwrap(), "20240307");
    }

    #[test]
    fn null_write_then_read_is_null_for_every_type() {
        let (mut table, _hooks) = table_with(&[
            ("N", FieldType::Numeric, 10, 0),
            ("S", FieldType::Character, 8, 0),
            ("D", FieldType::Date, 8, 0),
            ("L", FieldType::Logical, 1, 0),
        ]);

        for field in 0..4 {
            table.write_null(0, field).unwrap();
            assert!(table.is_null(0, field).unwrap(), "field {}", field);
        }

        // Non-null writes clear the null state.
        table.write_integer(0, 0, 5).unwrap();
        assert!(!table.is_null(0, 0).unwrap());
        table.write_string(0, 1, "x").unwrap();
        assert!(!table.is_null(0, 1).unwrap());
    }

    #[test]
    fn null_numeric_reads_as_asterisks() {
        let (mut table, _hooks) = table_with(&[("N", FieldType::Numeric, 6, 0)]);
        table.write_null(0, 0).unwrap();
        assert_eq!(table.read_string(0, 0).unwrap(), "******");
    }

    #[test]
    fn deletion_flag_round_trips_without_touching_fields() {
        let (mut table, _hooks) = table_with(&[("S", FieldType::Character, 4, 0)]);
        table.write_string(0, 0, "keep").unwrap();

        table.mark_deleted(0, true).unwrap();
        assert!(table.is_deleted(0).unwrap());
        assert_eq!(table.read_string(0, 0).unwrap(), "keep");

        table.mark_deleted(0, false).unwrap();
        assert!(!table.is_deleted(0).unwrap());
    }

    #[test]
    fn raw_record_round_trip() {
        let (mut table, _hooks) = table_with(&[("S", FieldType::Character, 4, 0)]);
        table.write_string(0, 0, "abcd").unwrap();

        let bytes = table.read_record_raw(0).unwrap().to_vec();
        assert_eq!(bytes, b" abcd");

        table.write_record_raw(1, b"*wxyz").unwrap();
        assert!(table.is_deleted(1).unwrap());
        assert_eq!(table.read_string(1, 0).unwrap(), "wxyz");
    }

    #[test]
    fn raw_record_write_rejects_wrong_length() {
        let (mut table, _hooks) = table_with(&[("S", FieldType::Character, 4, 0)]);
        assert!(table.write_record_raw(0, b"short").is_ok());
        assert!(table.write_record_raw(1, b"xx").is_err());
    }

    #[test]
    fn reads_flush_the_dirty_record_first() {
        let (mut table, hooks) = table_with(&[("N", FieldType::Numeric, 6, 0)]);
        table.write_integer(0, 0, 1).unwrap();
        table.write_integer(1, 0, 2).unwrap();

        // Reading record 0 forces record 1's dirty buffer to disk.
        assert_eq!(table.read_integer(0, 0).unwrap(), 1);

        let bytes = hooks.contents(std::path::Path::new("t.dbf")).unwrap();
        let start = table.header_length() + table.record_length();
        let stored = &bytes[start..start + table.record_length()];
        assert_eq!(stored, b"      2");
    }

    #[test]
    fn failed_reads_reach_the_error_hook() {
        let (mut table, hooks) = table_with(&[("N", FieldType::Numeric, 6, 0)]);
        table.write_integer(0, 0, 1).unwrap();
        table.close().unwrap();

        let mut table = DbfTable::open_with_hooks("t", Access::ReadWrite, hooks.clone()).unwrap();
        // Claim a second record so the engine attempts a read past the end
        // of the backing file.
        table.record_count = 2;
        assert!(table.read_integer(1, 0).is_err());
        assert!(!hooks.take_errors().is_empty());
    }
}
