//! Default hook provider backed by the host filesystem.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{Result, WrapErr};

use super::{Access, FileHooks, HookFile};

/// Hook provider over `std::fs`. Error reports go to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioHooks;

struct StdioFile(File);

impl HookFile for StdioFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.0.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.0.write(buf)?)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.0.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.0.stream_position()?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.0.flush()?)
    }
}

impl FileHooks for StdioHooks {
    fn open(&self, path: &Path, access: Access) -> Result<Box<dyn HookFile>> {
        let file = match access {
            Access::Read => OpenOptions::new().read(true).open(path),
            Access::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
            Access::Create => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path),
        }
        .wrap_err_with(|| format!("failed to open '{}'", path.display()))?;

        Ok(Box::new(StdioFile(file)))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)
            .wrap_err_with(|| format!("failed to remove '{}'", path.display()))
    }

    fn error(&self, message: &str) {
        eprintln!("{}", message);
    }
}
