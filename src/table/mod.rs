//! # Table Handle
//!
//! `DbfTable` is the engine's single entry point: a mutable, schema-aware
//! handle over one `.dbf` attribute table. It owns the underlying byte
//! stream, the schema, a one-record cache and the table metadata, and routes
//! all I/O through a caller-supplied [`FileHooks`] provider.
//!
//! ## Lifecycle
//!
//! - `open` / `open_with_hooks`: existing table. The supplied path's
//!   extension is replaced with `.dbf` (falling back to `.DBF`); a `.cpg`
//!   sidecar next to it, when present, supplies the code page.
//! - `create` / `create_with_hooks`: new table with an empty schema. The
//!   header is written lazily on the first mutating operation, so fields can
//!   still be added cheaply.
//! - `close`: flushes the dirty record, refreshes the header and releases the
//!   stream. Dropping the handle does the same on a best-effort basis.
//!
//! ## Record Cache
//!
//! At most one record is buffered. Loading another record first flushes the
//! buffered one when dirty. The flush path elides the positioning seek when
//! the stream already sits at the target offset *and* no read intervened
//! since the last write: no-op seeks defeat the sequential-write coalescing
//! of some network filesystems, so the engine tracks a
//! `require_next_write_seek` flag that every read sets and every successful
//! flush clears. Always seeking would also be correct; never seeking after a
//! read would not.
//!
//! ## Concurrency
//!
//! A handle is single-threaded and offers no internal locking. Handles over
//! distinct files are independent; two handles over the same file produce
//! undefined content.

mod alter;
mod record;

use std::path::Path;
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use zerocopy::IntoBytes;

use crate::header::{
    FileHeader, END_OF_FILE_CHAR, FIELD_DESCRIPTOR_SIZE, FILE_HEADER_SIZE, HEADER_TERMINATOR,
};
use crate::hooks::{Access, FileHooks, HookFile, StdioHooks};
use crate::schema::{FieldDef, Schema};
use crate::value::Date;

/// Code page used by `create` when the caller does not supply one.
pub const DEFAULT_CODE_PAGE: &str = "LDID/87";

/// A `.cpg` sidecar is read up to this many bytes, then cut at the first
/// CR or LF.
const CPG_READ_LIMIT: usize = 499;

/// Update date stamped on freshly created tables until the caller overrides
/// it.
const CREATE_STAMP: Date = Date {
    year: 1995,
    month: 7,
    day: 26,
};

/// Handle over one open attribute table.
pub struct DbfTable {
    pub(crate) hooks: Arc<dyn FileHooks>,
    pub(crate) file: Box<dyn HookFile>,
    pub(crate) schema: Schema,
    /// Raw descriptor block as stored on disk, 32 bytes per field.
    pub(crate) descriptor_image: Vec<u8>,
    pub(crate) record_count: u32,
    /// Offset of record 0; authoritative from the file header, which may
    /// exceed `32 + 32n + 1` in files produced elsewhere.
    pub(crate) header_length: u32,
    pub(crate) record_length: u16,
    pub(crate) current_record: Option<usize>,
    pub(crate) record_buf: Vec<u8>,
    pub(crate) work_field: Vec<u8>,
    code_page: Option<String>,
    update_date: Date,
    language_driver: u8,
    pub(crate) no_header: bool,
    pub(crate) updated: bool,
    pub(crate) current_record_modified: bool,
    pub(crate) require_next_write_seek: bool,
    pub(crate) write_eof_char: bool,
    finalized: bool,
}

impl DbfTable {
    /// Opens an existing table through the host filesystem.
    pub fn open<P: AsRef<Path>>(path: P, access: Access) -> Result<DbfTable> {
        Self::open_with_hooks(path, access, Arc::new(StdioHooks))
    }

    /// Opens an existing table through the given hook provider.
    pub fn open_with_hooks<P: AsRef<Path>>(
        path: P,
        access: Access,
        hooks: Arc<dyn FileHooks>,
    ) -> Result<DbfTable> {
        ensure!(
            access != Access::Create,
            "open expects an existing table; use create"
        );

        let base = path.as_ref().to_path_buf();
        let mut file = match hooks.open(&base.with_extension("dbf"), access) {
            Ok(file) => file,
            Err(_) => hooks
                .open(&base.with_extension("DBF"), access)
                .wrap_err_with(|| format!("failed to open table '{}'", base.display()))?,
        };

        let mut header_bytes = [0u8; FILE_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .wrap_err("failed to read table header")?;
        let header = FileHeader::from_bytes(&header_bytes)?;

        let record_count = header.record_count();
        let header_length = header.header_length() as u32;
        let record_length = header.record_length();
        let language_driver = header.language_driver();
        let (year, month, day) = header.update_date();
        let update_date = Date::new(year as i32 + 1900, month as i32, day as i32);

        let code_page = resolve_code_page(hooks.as_ref(), &base, language_driver);

        let declared_fields =
            (header_length as usize - FILE_HEADER_SIZE) / FIELD_DESCRIPTOR_SIZE;
        file.seek(FILE_HEADER_SIZE as u64)?;
        let mut block = vec![0u8; header_length as usize - FILE_HEADER_SIZE];
        file.read_exact(&mut block)
            .wrap_err("failed to read field descriptors")?;

        let schema = Schema::from_descriptors(&block, declared_fields)?;
        schema.check_fits(record_length)?;
        block.truncate(schema.field_count() * FIELD_DESCRIPTOR_SIZE);

        Ok(DbfTable {
            hooks,
            file,
            schema,
            descriptor_image: block,
            record_count,
            header_length,
            record_length,
            current_record: None,
            record_buf: vec![0u8; record_length as usize],
            work_field: Vec::new(),
            code_page,
            update_date,
            language_driver,
            no_header: false,
            updated: false,
            current_record_modified: false,
            require_next_write_seek: true,
            write_eof_char: true,
            finalized: false,
        })
    }

    /// Creates a new table with the default code page.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<DbfTable> {
        Self::create_with_hooks(path, Some(DEFAULT_CODE_PAGE), Arc::new(StdioHooks))
    }

    /// Creates a new table, controlling the code page. `"LDID/<n>"` with `n`
    /// in 0..=255 is stored in the header byte; any other non-empty string is
    /// written verbatim to the `.cpg` sidecar.
    pub fn create_with_code_page<P: AsRef<Path>>(
        path: P,
        code_page: Option<&str>,
    ) -> Result<DbfTable> {
        Self::create_with_hooks(path, code_page, Arc::new(StdioHooks))
    }

    /// Creates a new table through the given hook provider.
    pub fn create_with_hooks<P: AsRef<Path>>(
        path: P,
        code_page: Option<&str>,
        hooks: Arc<dyn FileHooks>,
    ) -> Result<DbfTable> {
        let base = path.as_ref().to_path_buf();
        let file = hooks
            .open(&base.with_extension("dbf"), Access::Create)
            .wrap_err_with(|| format!("failed to create table '{}'", base.display()))?;

        let cpg_path = base.with_extension("cpg");
        let mut language_driver = 0u8;
        let mut sidecar_written = false;
        if let Some(page) = code_page {
            // LDID/0 is a valid driver id, so out-of-range values fall back
            // to the sidecar rather than to zero.
            let ldid = page
                .strip_prefix("LDID/")
                .and_then(|digits| digits.parse::<u32>().ok())
                .filter(|&n| n <= 255);
            match ldid {
                Some(n) => language_driver = n as u8,
                None => {
                    let mut sidecar = hooks.open(&cpg_path, Access::Create)?;
                    sidecar.write_all(page.as_bytes())?;
                    sidecar_written = true;
                }
            }
        }
        if !sidecar_written {
            let _ = hooks.remove(&cpg_path);
        }

        Ok(DbfTable {
            hooks,
            file,
            schema: Schema::empty(),
            descriptor_image: Vec::new(),
            record_count: 0,
            header_length: (FILE_HEADER_SIZE + 1) as u32,
            record_length: 1,
            current_record: None,
            record_buf: vec![b' '; 1],
            work_field: Vec::new(),
            code_page: code_page.map(str::to_string),
            update_date: CREATE_STAMP,
            language_driver,
            no_header: true,
            updated: false,
            current_record_modified: false,
            require_next_write_seek: true,
            write_eof_char: true,
            finalized: false,
        })
    }

    /// Creates an empty table at `path` with this table's schema and code
    /// page, sharing the same hook provider.
    pub fn clone_empty<P: AsRef<Path>>(&self, path: P) -> Result<DbfTable> {
        let mut clone =
            DbfTable::create_with_hooks(path, self.code_page.as_deref(), Arc::clone(&self.hooks))?;

        clone.schema = self.schema.clone();
        clone.descriptor_image = self.descriptor_image.clone();
        clone.record_length = self.record_length;
        clone.header_length = self.header_length;
        clone.record_buf = vec![b' '; self.record_length as usize];
        clone.write_eof_char = self.write_eof_char;
        clone.write_header()?;
        clone.updated = true;
        Ok(clone)
    }

    /// Number of records, per the header.
    pub fn record_count(&self) -> usize {
        self.record_count as usize
    }

    /// Number of fields in the schema.
    pub fn field_count(&self) -> usize {
        self.schema.field_count()
    }

    pub fn fields(&self) -> &[FieldDef] {
        self.schema.fields()
    }

    pub fn field(&self, index: usize) -> Option<&FieldDef> {
        self.schema.field(index)
    }

    /// Case-insensitive field lookup; the first match wins when names repeat.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.schema.field_index(name)
    }

    /// One-byte native type code of a field, as stored in its descriptor.
    pub fn native_field_type(&self, index: usize) -> Option<u8> {
        self.schema.field(index).map(|field| field.field_type().code())
    }

    /// Bytes of one full record, including the deletion flag.
    pub fn record_length(&self) -> usize {
        self.record_length as usize
    }

    /// Offset of record 0.
    pub fn header_length(&self) -> usize {
        self.header_length as usize
    }

    /// The resolved code page: sidecar content, synthesized `"LDID/<n>"`, or
    /// none.
    pub fn code_page(&self) -> Option<&str> {
        self.code_page.as_deref()
    }

    /// Last-modified date recorded in the header.
    pub fn last_modified_date(&self) -> Date {
        self.update_date
    }

    /// Overrides the update date written into the header. Only the year's
    /// offset from 1900 is representable.
    pub fn set_last_modified_date(&mut self, date: Date) {
        self.update_date = date;
    }

    /// Controls whether the legacy `0x1A` marker is appended after the last
    /// record. On by default; readers never rely on it.
    pub fn set_write_eof_char(&mut self, write: bool) {
        self.write_eof_char = write;
    }

    /// Writes the deferred header of a freshly created table. No-op once the
    /// header exists.
    pub(crate) fn write_header(&mut self) -> Result<()> {
        if !self.no_header {
            return Ok(());
        }
        self.no_header = false;

        let mut header = FileHeader::new(
            self.header_length as u16,
            self.record_length,
            self.language_driver,
        );
        let (year, month, day) = self.stored_date();
        header.set_update_date(year, month, day);

        self.file.seek(0)?;
        self.file.write_all(header.as_bytes())?;
        self.file.write_all(&self.descriptor_image)?;

        let descriptors_end = FILE_HEADER_SIZE + self.descriptor_image.len();
        if self.header_length as usize > descriptors_end {
            self.file.write_all(&[HEADER_TERMINATOR])?;
        }

        if self.record_count == 0 && self.write_eof_char {
            self.file.write_all(&[END_OF_FILE_CHAR])?;
        }
        Ok(())
    }

    /// Refreshes the mutable header bytes (date and record count) without
    /// disturbing the descriptor region, then flushes the stream.
    pub fn update_header(&mut self) -> Result<()> {
        if self.no_header {
            self.write_header()?;
        }
        self.flush_record()?;

        self.file.seek(0)?;
        let mut bytes = [0u8; FILE_HEADER_SIZE];
        self.file.read_exact(&mut bytes)?;
        {
            let header = FileHeader::from_bytes_mut(&mut bytes)?;
            let (year, month, day) = self.stored_date();
            header.set_update_date(year, month, day);
            header.set_record_count(self.record_count);
        }
        self.file.seek(0)?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Flushes all pending state and releases the handle, surfacing any I/O
    /// failure. Dropping without `close` performs the same steps but swallows
    /// errors.
    pub fn close(mut self) -> Result<()> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if self.no_header {
            self.write_header()?;
        }
        self.flush_record()?;
        if self.updated {
            self.update_header()?;
        }
        self.file.flush()?;
        Ok(())
    }

    fn stored_date(&self) -> (u8, u8, u8) {
        (
            (self.update_date.year - 1900).clamp(0, 255) as u8,
            self.update_date.month.clamp(0, 255) as u8,
            self.update_date.day.clamp(0, 255) as u8,
        )
    }

    pub(crate) fn record_offset(&self, record: usize) -> u64 {
        self.header_length as u64 + record as u64 * self.record_length as u64
    }

    /// Writes the `0x1A` marker after the last record, if enabled.
    pub(crate) fn write_eof_marker(&mut self) -> Result<()> {
        if !self.write_eof_char {
            return Ok(());
        }
        let offset = self.record_offset(self.record_count as usize);
        self.file.seek(offset)?;
        self.file.write_all(&[END_OF_FILE_CHAR])?;
        Ok(())
    }

    pub(crate) fn invalidate_record_cache(&mut self) {
        self.current_record = None;
        self.current_record_modified = false;
    }

    pub(crate) fn report_error(&self, message: &str) {
        self.hooks.error(message);
    }
}

impl Drop for DbfTable {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}

/// Determines the code page on open: non-empty `.cpg`/`.CPG` sidecar content
/// wins; otherwise a non-zero language-driver byte becomes `"LDID/<n>"`.
fn resolve_code_page(hooks: &dyn FileHooks, base: &Path, language_driver: u8) -> Option<String> {
    for extension in ["cpg", "CPG"] {
        let Ok(mut sidecar) = hooks.open(&base.with_extension(extension), Access::Read) else {
            continue;
        };
        let mut buf = vec![0u8; CPG_READ_LIMIT];
        let mut filled = 0;
        while filled < buf.len() {
            match sidecar.read(&mut buf[filled..]) {
                Ok(0) | Err(_) => break,
                Ok(n) => filled += n,
            }
        }
        let text = &buf[..filled];
        let end = text
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(text.len());
        if end > 0 {
            return Some(String::from_utf8_lossy(&text[..end]).into_owned());
        }
        break;
    }

    (language_driver != 0).then(|| format!("LDID/{}", language_driver))
}
