//! # I/O Hook Abstraction Layer
//!
//! This module provides the `FileHooks` trait, the capability set through
//! which the table engine reaches the outside world. The engine performs no
//! direct system calls of its own: every open, read, write, seek, flush and
//! remove goes through a caller-supplied provider, as does locale-independent
//! float parsing and error reporting.
//!
//! ## Capability Set
//!
//! | Capability | Method | Notes |
//! |------------|--------|-------|
//! | open       | `FileHooks::open`   | returns a `HookFile` stream |
//! | remove     | `FileHooks::remove` | used for stale `.cpg` sidecars |
//! | error      | `FileHooks::error`  | human-readable failure reports |
//! | atof       | `FileHooks::atof`   | `.`-decimal parse, never locale-aware |
//! | read/write | `HookFile`          | byte-count returning, short-count = error |
//! | seek/tell  | `HookFile`          | absolute offsets only |
//! | flush      | `HookFile`          | push buffered writes down |
//!
//! Close is drop: a `HookFile` releases its resources when it goes out of
//! scope.
//!
//! ## Providers
//!
//! | Provider      | Backing           | Intended use            |
//! |---------------|-------------------|-------------------------|
//! | `StdioHooks`  | `std::fs`         | default, host filesystem |
//! | `MemoryHooks` | shared byte maps  | tests, ephemeral tables  |
//!
//! Alternate providers (network filesystems, archive members, ...) implement
//! the same two traits and are handed to `DbfTable::open_with_hooks`.
//!
//! ## Access Modes
//!
//! The xBase API tradition recognizes exactly three mode strings: `"r"`/`"rb"`
//! for read-only and `"r+"`/`"rb+"`/`"r+b"` for read-write. `Access::parse`
//! performs that normalization; anything else is rejected.

mod memory;
mod stdio;

pub use memory::MemoryHooks;
pub use stdio::StdioHooks;

use std::path::Path;

use eyre::{bail, Result};

/// File access mode, normalized from the classic mode strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Existing file, reads only (`"rb"`).
    Read,
    /// Existing file, reads and writes (`"rb+"`).
    ReadWrite,
    /// New file, truncating any existing content (`"wb+"`).
    Create,
}

impl Access {
    /// Normalizes a classic mode string. Only `"r"`, `"rb"`, `"r+"`, `"rb+"`
    /// and `"r+b"` are recognized.
    pub fn parse(mode: &str) -> Result<Access> {
        match mode {
            "r" | "rb" => Ok(Access::Read),
            "r+" | "rb+" | "r+b" => Ok(Access::ReadWrite),
            _ => bail!("unsupported access mode '{}'", mode),
        }
    }

    /// Returns true if writes are permitted.
    pub fn is_writable(self) -> bool {
        !matches!(self, Access::Read)
    }
}

/// An open byte stream produced by a `FileHooks` provider.
///
/// Offsets are absolute. Reads and writes return the number of bytes moved;
/// the engine treats short counts on its fixed-size transfers as failures.
pub trait HookFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn seek(&mut self, offset: u64) -> Result<()>;
    fn tell(&mut self) -> Result<u64>;
    fn flush(&mut self) -> Result<()>;

    /// Reads exactly `buf.len()` bytes or fails.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read(&mut buf[done..])?;
            if n == 0 {
                bail!("unexpected end of file after {} of {} bytes", done, buf.len());
            }
            done += n;
        }
        Ok(())
    }

    /// Writes all of `buf` or fails.
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.write(&buf[done..])?;
            if n == 0 {
                bail!("wrote only {} of {} bytes", done, buf.len());
            }
            done += n;
        }
        Ok(())
    }
}

/// Provider of file streams and ambient services for a table handle.
///
/// Implementations must not apply locale rules in `atof`: the decimal
/// separator is always `'.'` regardless of the process environment.
pub trait FileHooks {
    fn open(&self, path: &Path, access: Access) -> Result<Box<dyn HookFile>>;

    fn remove(&self, path: &Path) -> Result<()>;

    /// Reports a human-readable failure message. Providers may log, collect
    /// or discard these; the engine also returns the failure as an error.
    fn error(&self, _message: &str) {}

    /// Locale-independent float parse with C `atof` semantics: leading
    /// whitespace skipped, longest numeric prefix parsed, `0.0` on no parse.
    fn atof(&self, text: &str) -> f64 {
        let trimmed = text.trim_start();
        if let Ok(value) = trimmed.trim_end().parse::<f64>() {
            return value;
        }
        // Longest prefix that still parses.
        for end in (1..=trimmed.len()).rev() {
            if !trimmed.is_char_boundary(end) {
                continue;
            }
            if let Ok(value) = trimmed[..end].parse::<f64>() {
                return value;
            }
        }
        0.0
    }
}
