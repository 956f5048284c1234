//! # Schema Mutation Tests
//!
//! End-to-end coverage of the four schema mutations against the host
//! filesystem: add, delete, reorder, alter. The invariants under test:
//!
//! - Offsets stay contiguous and the record length tracks the widths
//! - The record count never changes and deletion flags never flip
//! - Untouched fields compare byte-equal before and after, modulo the
//!   documented shift when a width changes
//! - The rewritten file reopens cleanly and the header agrees with it
//!
//! Expected values are byte-for-byte; do not loosen them to make a change
//! pass.

use std::fs;
use std::path::PathBuf;

use tempfile::{tempdir, TempDir};

use dbftable::{Access, Date, DbfTable, FieldType};

fn table_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn assert_invariants(table: &DbfTable) {
    let mut expected_offset = 1u32;
    for field in table.fields() {
        assert_eq!(field.offset() as u32, expected_offset);
        expected_offset += field.width() as u32;
    }
    assert!(expected_offset as usize <= table.record_length() + 1);
}

mod add_field {
    use super::*;

    #[test]
    fn new_field_is_null_in_existing_records() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("ID", FieldType::Numeric, 6, 0).unwrap();
        table.write_integer(0, 0, 10).unwrap();
        table.write_integer(1, 0, 20).unwrap();

        table.add_field("SEEN", FieldType::Date, 8, 0).unwrap();

        assert_eq!(table.record_count(), 2);
        assert_invariants(&table);
        for record in 0..2 {
            assert!(table.is_null(record, 1).unwrap());
            assert_eq!(table.read_string(record, 1).unwrap(), "00000000");
        }
        assert_eq!(table.read_integer(0, 0).unwrap(), 10);
        assert_eq!(table.read_integer(1, 0).unwrap(), 20);
    }

    #[test]
    fn added_field_survives_reopen_with_values() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("A", FieldType::Character, 3, 0).unwrap();
        table.write_string(0, 0, "abc").unwrap();

        table.add_field("B", FieldType::Numeric, 5, 0).unwrap();
        table.write_integer(0, 1, 77).unwrap();
        table.close().unwrap();

        let mut table = DbfTable::open(&path, Access::ReadWrite).unwrap();
        assert_eq!(table.field_count(), 2);
        assert_eq!(table.read_string(0, 0).unwrap(), "abc");
        assert_eq!(table.read_integer(0, 1).unwrap(), 77);
    }

    #[test]
    fn adding_to_a_table_with_many_records_moves_every_record() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("N", FieldType::Numeric, 6, 0).unwrap();
        for record in 0..50 {
            table.write_integer(record, 0, record as i64 * 11).unwrap();
        }

        table.add_field("PAD", FieldType::Character, 9, 0).unwrap();

        for record in 0..50 {
            assert_eq!(table.read_integer(record, 0).unwrap(), record as i64 * 11);
            assert!(table.is_null(record, 1).unwrap());
        }
    }
}

mod delete_field {
    use super::*;

    #[test]
    fn deleting_the_first_of_three_fields_shifts_the_rest() {
        // Widths 4, 3, 2: the record shrinks from 10 bytes to 6.
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("A", FieldType::Character, 4, 0).unwrap();
        table.add_field("B", FieldType::Character, 3, 0).unwrap();
        table.add_field("C", FieldType::Character, 2, 0).unwrap();
        table.write_string(0, 0, "aaaa").unwrap();
        table.write_string(0, 1, "bbb").unwrap();
        table.write_string(0, 2, "cc").unwrap();
        assert_eq!(table.record_length(), 10);

        table.delete_field(0).unwrap();

        assert_eq!(table.record_length(), 6);
        assert_invariants(&table);
        assert_eq!(table.field(0).unwrap().offset(), 1);
        assert_eq!(table.field(1).unwrap().offset(), 4);
        assert_eq!(table.read_string(0, 0).unwrap(), "bbb");
        assert_eq!(table.read_string(0, 1).unwrap(), "cc");
    }

    #[test]
    fn deleted_schema_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("KEEP", FieldType::Numeric, 8, 2).unwrap();
        table.add_field("DROP", FieldType::Character, 12, 0).unwrap();
        table.write_double(0, 0, 3.25).unwrap();
        table.write_string(0, 1, "scratch").unwrap();

        table.delete_field(1).unwrap();
        table.close().unwrap();

        let mut table = DbfTable::open(&path, Access::Read).unwrap();
        assert_eq!(table.field_count(), 1);
        assert_eq!(table.field(0).unwrap().name(), "KEEP");
        assert_eq!(table.read_double(0, 0).unwrap(), 3.25);
    }

    #[test]
    fn stale_tail_bytes_are_unreachable_through_the_record_count() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("A", FieldType::Character, 6, 0).unwrap();
        table.add_field("B", FieldType::Character, 6, 0).unwrap();
        table.write_string(0, 0, "one").unwrap();
        table.write_string(1, 0, "two").unwrap();
        table.delete_field(1).unwrap();
        table.close().unwrap();

        // The file may keep stale bytes past the shortened record stream.
        let bytes = fs::read(path.with_extension("dbf")).unwrap();
        let header_length = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let record_length = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
        assert!(bytes.len() >= header_length + 2 * record_length);

        let mut table = DbfTable::open(&path, Access::Read).unwrap();
        assert_eq!(table.record_count(), 2);
        assert_eq!(table.read_string(1, 0).unwrap(), "two   ");
    }
}

mod reorder_fields {
    use super::*;

    #[test]
    fn permuted_schema_and_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("A", FieldType::Character, 2, 0).unwrap();
        table.add_field("B", FieldType::Numeric, 4, 0).unwrap();
        table.add_field("C", FieldType::Date, 8, 0).unwrap();
        table.write_string(0, 0, "aa").unwrap();
        table.write_integer(0, 1, 42).unwrap();
        table.write_date(0, 2, &Date::new(2001, 2, 3)).unwrap();

        table.reorder_fields(&[2, 0, 1]).unwrap();
        assert_invariants(&table);
        table.close().unwrap();

        let mut table = DbfTable::open(&path, Access::Read).unwrap();
        assert_eq!(table.field(0).unwrap().name(), "C");
        assert_eq!(table.field(1).unwrap().name(), "A");
        assert_eq!(table.field(2).unwrap().name(), "B");
        assert_eq!(table.read_date(0, 0).unwrap(), Date::new(2001, 2, 3));
        assert_eq!(table.read_string(0, 1).unwrap(), "aa");
        assert_eq!(table.read_integer(0, 2).unwrap(), 42);
    }

    #[test]
    fn identity_permutation_changes_nothing() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("A", FieldType::Character, 4, 0).unwrap();
        table.add_field("B", FieldType::Character, 4, 0).unwrap();
        table.write_string(0, 0, "left").unwrap();
        table.write_string(0, 1, "rite").unwrap();
        let before = table.read_record_raw(0).unwrap().to_vec();

        table.reorder_fields(&[0, 1]).unwrap();

        assert_eq!(table.read_record_raw(0).unwrap(), &before[..]);
    }
}

mod alter_field {
    use super::*;

    #[test]
    fn narrowing_a_numeric_field_keeps_the_low_digits() {
        // N(10,0) -> N(6,0): "       123" keeps its digits as "   123";
        // "1234567890" truncates from the left to "567890".
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("N", FieldType::Numeric, 10, 0).unwrap();
        table.write_integer(0, 0, 123).unwrap();
        table.write_integer(1, 0, 1234567890).unwrap();

        table.alter_field(0, "N", FieldType::Numeric, 6, 0).unwrap();
        assert_invariants(&table);

        assert_eq!(table.read_string(0, 0).unwrap(), "   123");
        assert_eq!(table.read_string(1, 0).unwrap(), "567890");
        assert_eq!(table.read_integer(0, 0).unwrap(), 123);
    }

    #[test]
    fn widening_survives_reopen_and_preserves_values() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("N", FieldType::Numeric, 4, 0).unwrap();
        table.add_field("S", FieldType::Character, 4, 0).unwrap();
        table.write_integer(0, 0, 42).unwrap();
        table.write_string(0, 1, "tail").unwrap();

        table.alter_field(0, "N", FieldType::Numeric, 12, 2).unwrap();
        table.close().unwrap();

        let mut table = DbfTable::open(&path, Access::Read).unwrap();
        let field = table.field(0).unwrap();
        assert_eq!(field.width(), 12);
        assert_eq!(field.decimals(), 2);
        assert_eq!(table.read_string(0, 0).unwrap(), "          42");
        assert_eq!(table.read_double(0, 0).unwrap(), 42.0);
        assert_eq!(table.read_string(0, 1).unwrap(), "tail");
    }

    #[test]
    fn retyping_at_equal_width_converts_nulls_only() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("X", FieldType::Character, 8, 0).unwrap();
        table.write_string(0, 0, "20010203").unwrap();
        table.write_null(1, 0).unwrap();

        table.alter_field(0, "X", FieldType::Date, 8, 0).unwrap();

        assert_eq!(table.read_date(0, 0).unwrap(), Date::new(2001, 2, 3));
        // The null record now carries the date sentinel.
        assert_eq!(table.read_string(1, 0).unwrap(), "00000000");
        assert!(table.is_null(1, 0).unwrap());
    }

    #[test]
    fn renaming_without_resize_leaves_records_untouched() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("BEFORE", FieldType::Character, 6, 0).unwrap();
        table.write_string(0, 0, "stable").unwrap();
        let before = table.read_record_raw(0).unwrap().to_vec();

        table
            .alter_field(0, "AFTER", FieldType::Character, 6, 0)
            .unwrap();

        assert_eq!(table.field(0).unwrap().name(), "AFTER");
        assert_eq!(table.read_record_raw(0).unwrap(), &before[..]);
    }

    #[test]
    fn widening_preserves_null_and_deletion_state() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("N", FieldType::Numeric, 5, 0).unwrap();
        table.write_null(0, 0).unwrap();
        table.write_integer(1, 0, 3).unwrap();
        table.mark_deleted(1, true).unwrap();

        table.alter_field(0, "N", FieldType::Numeric, 9, 0).unwrap();

        assert_eq!(table.record_count(), 2);
        assert!(table.is_null(0, 0).unwrap());
        assert_eq!(table.read_string(0, 0).unwrap(), "*********");
        assert!(table.is_deleted(1).unwrap());
        assert_eq!(table.read_integer(1, 0).unwrap(), 3);
    }
}

mod combined {
    use super::*;

    #[test]
    fn mutation_sequence_keeps_the_table_consistent() {
        let dir = tempdir().unwrap();
        let path = table_path(&dir, "t");
        let mut table = DbfTable::create(&path).unwrap();
        table.add_field("ID", FieldType::Numeric, 6, 0).unwrap();
        table.add_field("NAME", FieldType::Character, 10, 0).unwrap();
        table.add_field("FLAG", FieldType::Logical, 1, 0).unwrap();
        for record in 0..5 {
            table.write_integer(record, 0, record as i64).unwrap();
            table
                .write_string(record, 1, &format!("name{}", record))
                .unwrap();
            table
                .write_logical(record, 2, if record % 2 == 0 { 'T' } else { 'F' })
                .unwrap();
        }
        table.mark_deleted(3, true).unwrap();

        table.add_field("WHEN", FieldType::Date, 8, 0).unwrap();
        table.delete_field(2).unwrap();
        table.reorder_fields(&[1, 0, 2]).unwrap();
        table.alter_field(1, "ID", FieldType::Numeric, 8, 0).unwrap();
        assert_invariants(&table);
        table.close().unwrap();

        let mut table = DbfTable::open(&path, Access::Read).unwrap();
        assert_eq!(table.record_count(), 5);
        assert_eq!(table.field(0).unwrap().name(), "NAME");
        assert_eq!(table.field(1).unwrap().name(), "ID");
        assert_eq!(table.field(2).unwrap().name(), "WHEN");
        for record in 0..5 {
            assert_eq!(table.read_integer(record, 1).unwrap(), record as i64);
            assert_eq!(
                table.read_string(record, 0).unwrap(),
                format!("name{}     ", record)
            );
            assert!(table.is_null(record, 2).unwrap());
        }
        assert!(table.is_deleted(3).unwrap());
        assert!(!table.is_deleted(0).unwrap());
    }
}
