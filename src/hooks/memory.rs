//! In-memory hook provider for tests and ephemeral tables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::{bail, Result};

use super::{Access, FileHooks, HookFile};

type SharedBytes = Arc<Mutex<Vec<u8>>>;

/// Hook provider keeping every file as a growable byte vector.
///
/// Clones share the same file map, so a table created through one clone can
/// be reopened through another. Error reports are collected and can be
/// inspected with [`MemoryHooks::take_errors`].
#[derive(Debug, Clone, Default)]
pub struct MemoryHooks {
    files: Arc<Mutex<HashMap<PathBuf, SharedBytes>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl MemoryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a file exists under `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    /// Returns a copy of the file content, if present.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files.get(path).map(|bytes| bytes.lock().unwrap().clone())
    }

    /// Drains and returns every error report received so far.
    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.errors.lock().unwrap())
    }
}

struct MemoryFile {
    data: SharedBytes,
    position: u64,
    writable: bool,
}

impl HookFile for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock().unwrap();
        let start = (self.position as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(data);
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            bail!("file opened read-only");
        }
        let mut data = self.data.lock().unwrap();
        let start = self.position as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        drop(data);
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.position = offset;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.position)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl FileHooks for MemoryHooks {
    fn open(&self, path: &Path, access: Access) -> Result<Box<dyn HookFile>> {
        let mut files = self.files.lock().unwrap();
        let data = match access {
            Access::Read | Access::ReadWrite => match files.get(path) {
                Some(data) => Arc::clone(data),
                None => bail!("no such in-memory file '{}'", path.display()),
            },
            Access::Create => {
                let data: SharedBytes = Arc::default();
                files.insert(path.to_path_buf(), Arc::clone(&data));
                data
            }
        };

        Ok(Box::new(MemoryFile {
            data,
            position: 0,
            writable: access.is_writable(),
        }))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if self.files.lock().unwrap().remove(path).is_none() {
            bail!("no such in-memory file '{}'", path.display());
        }
        Ok(())
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}
