//! Access to the file system, expressed as a small capability set so tests
//! can substitute an in-memory implementation for the whole builder.

use std::time::UNIX_EPOCH;

use anyhow::anyhow;

use crate::graph::MTime;

pub trait DiskInterface {
    /// stat() a path.  A missing file is a normal result; anything else
    /// that keeps us from knowing the mtime is an error.
    fn stat(&self, path: &str) -> anyhow::Result<MTime>;
    /// Read a file, or None if it doesn't exist.
    fn read_file(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()>;
    /// Create a directory and all of its parents.
    fn make_dirs(&self, dir: &str) -> anyhow::Result<()>;
    /// Remove a file; Ok(false) when it was already absent.
    fn remove_file(&self, path: &str) -> anyhow::Result<bool>;
}

/// The directory part of a path, if it has one.
pub fn parent_dir(path: &str) -> Option<&str> {
    path.rfind(|c| c == '/' || c == '\\').map(|ofs| &path[..ofs])
}

fn mtime_nanos(meta: &std::fs::Metadata) -> anyhow::Result<u64> {
    let mtime = meta.modified()?;
    // Pre-epoch timestamps clamp to the smallest real stamp rather than
    // colliding with the "missing" encoding.
    Ok(mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1))
}

pub struct RealDiskInterface {}

impl DiskInterface for RealDiskInterface {
    fn stat(&self, path: &str) -> anyhow::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(mtime_nanos(&meta)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MTime::Missing),
            Err(err) => Err(anyhow!("stat {}: {}", path, err)),
        }
    }

    fn read_file(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow!("read {}: {}", path, err)),
        }
    }

    fn write_file(&self, path: &str, contents: &str) -> anyhow::Result<()> {
        std::fs::write(path, contents).map_err(|err| anyhow!("write {}: {}", path, err))
    }

    fn make_dirs(&self, dir: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir).map_err(|err| anyhow!("mkdir {}: {}", dir, err))
    }

    fn remove_file(&self, path: &str) -> anyhow::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(anyhow!("remove {}: {}", path, err)),
        }
    }
}
