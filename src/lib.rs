//! # dbftable - xBase Attribute Table Engine
//!
//! `dbftable` reads and writes the `.dbf` attribute tables that accompany
//! shapefile datasets: a mutable, schema-aware, record-oriented binary
//! container with in-place record editing, schema alteration and per-type
//! null sentinels.
//!
//! ## Quick Start
//!
//! ```ignore
//! use dbftable::{Access, DbfTable, FieldType};
//!
//! let mut table = DbfTable::create("cities")?;
//! table.add_field("NAME", FieldType::Character, 32, 0)?;
//! table.add_field("POP", FieldType::Numeric, 10, 0)?;
//!
//! table.write_string(0, 0, "Uppsala")?;
//! table.write_integer(0, 1, 177_074)?;
//! table.close()?;
//!
//! let mut table = DbfTable::open("cities", Access::Read)?;
//! assert_eq!(table.read_integer(0, 1)?, 177_074);
//! ```
//!
//! ## Architecture
//!
//! The engine is layered, leaves first:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Table handle (DbfTable)        │
//! ├──────────────────┬──────────────────┤
//! │ Schema mutation  │  Typed attribute │
//! │ (add/delete/     │  reads & writes  │
//! │  reorder/alter)  │                  │
//! ├──────────────────┴──────────────────┤
//! │     Record cache (one record,       │
//! │     dirty flag, lazy flush)         │
//! ├─────────────────────────────────────┤
//! │  Value codec │ Schema │ Header codec│
//! ├─────────────────────────────────────┤
//! │    I/O hooks (FileHooks providers)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A dataset shares one base name across companions:
//!
//! ```text
//! cities.dbf    # attribute table: header, descriptors, records
//! cities.cpg    # optional code-page sidecar, plain text
//! cities.shp    # geometry store        (not handled by this crate)
//! cities.shx    # geometry index        (not handled by this crate)
//! ```
//!
//! All storage is textual inside fixed-width records; see the [`header`] and
//! [`value`] module docs for the exact byte layouts.
//!
//! ## Pluggable I/O
//!
//! Every byte moved by the engine goes through the [`hooks::FileHooks`]
//! capability set. [`hooks::StdioHooks`] is the stock provider over the host
//! filesystem; [`hooks::MemoryHooks`] keeps whole tables in memory, which the
//! test suites use throughout. Custom providers can bridge archives, object
//! stores or network filesystems without touching the engine.
//!
//! ## Module Overview
//!
//! - [`hooks`]: byte-stream capability traits and the stock providers
//! - [`header`]: 32-byte file header and field descriptor codecs
//! - [`schema`]: field table with derived offsets and limits
//! - [`value`]: value encoding, null sentinels, dates
//! - [`table`]: the table handle, record cache and schema mutation

pub mod header;
pub mod hooks;
pub mod schema;
pub mod table;
pub mod value;

pub use hooks::{Access, FileHooks, HookFile, MemoryHooks, StdioHooks};
pub use schema::{FieldDef, FieldType, LogicalType, Schema};
pub use table::{DbfTable, DEFAULT_CODE_PAGE};
pub use value::{Date, WriteOutcome};
