//! Filesystem access used by the maintainer and the reconciler.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Fingerprint stored for every container row.
pub const DIRECTORY_FINGERPRINT: &str = "directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Epoch seconds.
    pub mtime: i64,
    pub is_dir: bool,
}

pub trait FileSystem: Send + Sync {
    fn stat(&self, url: &Path) -> io::Result<FileStat>;

    /// Names of the immediate children of a directory.
    fn list(&self, url: &Path) -> io::Result<Vec<String>>;

    /// Content hash of a file, lowercase hex.
    fn fingerprint(&self, url: &Path) -> io::Result<String>;

    fn exists(&self, url: &Path) -> bool {
        self.stat(url).is_ok()
    }
}

/// The local disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn is_container(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    (metadata.mode() & libc::S_IFMT as u32) == libc::S_IFDIR as u32
}

#[cfg(not(unix))]
fn is_container(metadata: &fs::Metadata) -> bool {
    metadata.is_dir()
}

impl FileSystem for LocalFs {
    fn stat(&self, url: &Path) -> io::Result<FileStat> {
        let metadata = fs::metadata(url)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(FileStat { size: metadata.len(), mtime, is_dir: is_container(&metadata) })
    }

    fn list(&self, url: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(url)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn fingerprint(&self, url: &Path) -> io::Result<String> {
        let mut file = fs::File::open(url)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}
