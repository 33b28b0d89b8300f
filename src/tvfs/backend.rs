//! The backend interface: a minimal POSIX-shaped surface the TVFS engine
//! drives, plus the local filesystem implementation.
//!
//! Open operations yield owning [`tokio::fs::File`] handles; the handle's
//! lifetime ends with an explicit close (drop). The impersonation client in
//! [`crate::impersonation`] implements the same trait by remoting each call
//! into a subprocess running under a different OS identity.

use std::fmt::Debug;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::entry::EntryType;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only.
    Reading,
    /// Write only; the file is created when absent.
    Writing,
    /// Read and write; the file is created when absent.
    ReadWrite,
}

/// What the backend knows about one native entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeInfo {
    /// File, directory, symlink or unknown.
    pub entry_type: EntryType,
    /// Size in bytes. Zero for directories.
    pub size: u64,
    /// Last modification, UTC.
    pub mtime: DateTime<Utc>,
}

impl NativeInfo {
    pub(crate) fn from_std(meta: &std::fs::Metadata) -> NativeInfo {
        let entry_type = if meta.is_symlink() {
            EntryType::Link
        } else if meta.is_dir() {
            EntryType::Dir
        } else if meta.is_file() {
            EntryType::File
        } else {
            EntryType::Unknown
        };

        let mtime = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

        NativeInfo {
            entry_type,
            size: meta.len(),
            mtime,
        }
    }
}

/// The async surface every backend provides.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Opens a file. With `truncate`, an existing file is emptied first.
    async fn open_file(&self, path: &Path, mode: OpenMode, truncate: bool) -> io::Result<tokio::fs::File>;

    /// Reads the contents of a directory: name plus info per entry.
    async fn open_directory(&self, path: &Path) -> io::Result<Vec<(String, NativeInfo)>>;

    /// Renames an entry.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Removes a file. Directories are refused.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Removes an empty directory.
    async fn remove_directory(&self, path: &Path) -> io::Result<()>;

    /// Stats an entry. With `follow_links`, symlinks are resolved first.
    async fn info(&self, path: &Path, follow_links: bool) -> io::Result<NativeInfo>;

    /// Creates a directory, the whole chain when `recurse` is set.
    async fn mkdir(&self, path: &Path, recurse: bool) -> io::Result<()>;

    /// Sets the modification time of an entry.
    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> io::Result<()>;
}

/// Direct filesystem calls in the server's own security context.
#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    /// A backend operating as the server process itself.
    pub fn new() -> Self {
        LocalBackend
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn open_file(&self, path: &Path, mode: OpenMode, truncate: bool) -> io::Result<tokio::fs::File> {
        let mut options = tokio::fs::OpenOptions::new();
        match mode {
            OpenMode::Reading => {
                options.read(true);
            }
            OpenMode::Writing => {
                options.write(true).create(true);
            }
            OpenMode::ReadWrite => {
                options.read(true).write(true).create(true);
            }
        }
        if truncate && mode != OpenMode::Reading {
            options.truncate(true);
        }
        options.open(path).await
    }

    async fn open_directory(&self, path: &Path) -> io::Result<Vec<(String, NativeInfo)>> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(dirent) = dir.next_entry().await? {
            let name = dirent.file_name().to_string_lossy().into_owned();
            let meta = match dirent.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue, // raced away; skip
            };
            entries.push((name, NativeInfo::from_std(&meta)));
        }
        Ok(entries)
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn remove_directory(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir(path).await
    }

    async fn info(&self, path: &Path, follow_links: bool) -> io::Result<NativeInfo> {
        let meta = if follow_links {
            tokio::fs::metadata(path).await?
        } else {
            tokio::fs::symlink_metadata(path).await?
        };
        Ok(NativeInfo::from_std(&meta))
    }

    async fn mkdir(&self, path: &Path, recurse: bool) -> io::Result<()> {
        if recurse {
            tokio::fs::create_dir_all(path).await
        } else {
            tokio::fs::create_dir(path).await
        }
    }

    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> io::Result<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::options().read(true).open(&path)?;
            let times = std::fs::FileTimes::new().set_modified(std::time::SystemTime::from(mtime));
            file.set_times(times)
        })
        .await
        .map_err(|join_err| io::Error::other(join_err))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn local_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let file_path = dir.path().join("hello.txt");

        let file = backend.open_file(&file_path, OpenMode::Writing, true).await.unwrap();
        drop(file);

        let info = backend.info(&file_path, true).await.unwrap();
        assert_eq!(info.entry_type, EntryType::File);
        assert_eq!(info.size, 0);

        let listed = backend.open_directory(dir.path()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "hello.txt");

        backend.remove_file(&file_path).await.unwrap();
        assert!(backend.info(&file_path, true).await.is_err());
    }

    #[tokio::test]
    async fn mkdir_recurse_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let deep = dir.path().join("a/b/c");

        backend.mkdir(&deep, true).await.unwrap();
        assert_eq!(backend.info(&deep, true).await.unwrap().entry_type, EntryType::Dir);

        backend.remove_directory(&deep).await.unwrap();
        assert!(backend.info(&deep, true).await.is_err());
    }

    #[tokio::test]
    async fn set_mtime_is_observable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new();
        let file_path = dir.path().join("stamped");
        drop(backend.open_file(&file_path, OpenMode::Writing, true).await.unwrap());

        let stamp = Utc.with_ymd_and_hms(2019, 7, 15, 10, 30, 0).unwrap();
        backend.set_mtime(&file_path, stamp).await.unwrap();

        let info = backend.info(&file_path, true).await.unwrap();
        assert_eq!(info.mtime, stamp);
    }
}
