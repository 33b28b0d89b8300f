//! The TVFS engine: path resolution and the operation surface the FTP
//! commander drives.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use slog::Logger;
use tokio::io::{AsyncSeekExt, SeekFrom};

use super::backend::{Backend, LocalBackend, OpenMode};
use super::entry::{EntriesIterator, Entry, EntryType};
use super::mount::MountTree;
use super::path::PathElements;
use super::permissions::Permissions;
use super::{Error, ErrorKind, Result};
use crate::receiver::receiver;

/// Where a transfer resumes inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPoint {
    /// Start from the beginning; writes truncate.
    #[default]
    Start,
    /// Seek to this byte offset; writes truncate from there.
    Offset(u64),
    /// Seek to the end (APPE).
    Append,
}

/// How an enumeration walks the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalMode {
    /// Produce the target itself as a single entry.
    NoChildren,
    /// Produce the children of the target, which must be a directory.
    OnlyChildren,
    /// Pick by target type: children for directories, the entry itself
    /// otherwise.
    Autodetect,
}

/// A virtual child exposed by a mount-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountChild {
    /// Segment name.
    pub name: String,
    /// The child node's own permissions.
    pub perms: Permissions,
    /// The child node's native target, if any.
    pub target: Option<PathBuf>,
}

/// The outcome of resolving a user-supplied path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The canonical absolute virtual path.
    pub tvfs_path: String,
    /// The composed native path; `None` when the location is purely virtual.
    pub native_path: Option<PathBuf>,
    /// Effective permissions at the location.
    pub perms: Permissions,
    /// Present iff the path is itself a mount-tree node: the node's children,
    /// for unioning into enumerations.
    pub mount_children: Option<Vec<MountChild>>,
}

/// The effective permissions a listed child entry reports.
///
/// Directories deeper in the tree are only reachable when the listed
/// directory's permissions recurse, so a sub-directory entry loses all
/// permissions without `APPLY_RECURSIVELY` and loses `REMOVE`/`RENAME`
/// without `ALLOW_STRUCTURE_MODIFICATION`. Files keep the raw resolved
/// permissions.
fn fixup_child_perms(parent: Permissions, entry_type: EntryType) -> Permissions {
    if !entry_type.is_directory() {
        return parent;
    }

    if !parent.contains(Permissions::APPLY_RECURSIVELY) {
        return Permissions::empty();
    }

    let mut perms = parent;
    if !parent.contains(Permissions::ALLOW_STRUCTURE_MODIFICATION) {
        perms.remove(Permissions::REMOVE | Permissions::RENAME);
    }
    perms
}

/// The per-user TVFS engine.
///
/// Cheap to clone; clones share the mount tree, backend and current
/// directory.
#[derive(Debug, Clone)]
pub struct Engine {
    mount_tree: Arc<MountTree>,
    backend: Arc<dyn Backend>,
    current_directory: Arc<Mutex<String>>,
    logger: Logger,
    sync_timeout: Duration,
}

impl Engine {
    /// An engine over the given tree and backend. `sync_timeout` bounds the
    /// synchronous wrappers.
    pub fn new(logger: Logger, mount_tree: Arc<MountTree>, backend: Option<Arc<dyn Backend>>, sync_timeout: Duration) -> Self {
        Engine {
            mount_tree,
            backend: backend.unwrap_or_else(|| Arc::new(LocalBackend::new())),
            current_directory: Arc::new(Mutex::new("/".to_string())),
            logger,
            sync_timeout,
        }
    }

    /// Swaps the mount tree, e.g. after an administrator reconfigured the
    /// user. The current directory is kept; it re-resolves against the new
    /// tree on the next operation.
    pub fn set_mount_tree(&mut self, mount_tree: Arc<MountTree>) {
        self.mount_tree = mount_tree;
    }

    /// The backend in use.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The current directory: always a canonical absolute unix path.
    pub fn current_directory(&self) -> String {
        self.current_directory.lock().expect("cwd lock").clone()
    }

    /// Resolves `path` against the current directory and the mount tree.
    pub fn resolve_path(&self, path: &str) -> Option<ResolvedPath> {
        let current = self.current_directory();
        let elements = PathElements::resolve(&current, path)?;

        let (node, matched) = self.mount_tree.find_node(&elements);
        let tvfs_path = elements.to_unix_string();
        let node_level = elements.len() - matched;

        let mut perms = node.perms;
        if !perms.contains(Permissions::APPLY_RECURSIVELY) && node_level > 1 {
            perms = Permissions::empty();
        }

        let native_path = node.target.as_ref().map(|t| elements.to_native(t, matched));

        let mount_children = if node_level == 0 {
            Some(
                node.children
                    .iter()
                    .map(|(name, child)| MountChild {
                        name: name.clone(),
                        perms: child.perms,
                        target: child.target.clone(),
                    })
                    .collect(),
            )
        } else {
            // Below a mount, writability implies the right to delete and
            // rename what the write bit lets the user create.
            if perms.contains(Permissions::WRITE) {
                perms |= Permissions::REMOVE | Permissions::RENAME;
            }
            None
        };

        Some(ResolvedPath {
            tvfs_path,
            native_path,
            perms,
            mount_children,
        })
    }

    /// Opens a file, seeking (and for writes, truncating) according to
    /// `rest`.
    pub async fn open_file(&self, path: &str, mode: OpenMode, rest: RestartPoint) -> Result<tokio::fs::File> {
        let resolved = self.resolve_path(path).ok_or_else(|| Error::new(ErrorKind::Invalid, path))?;

        let writes = matches!(mode, OpenMode::Writing | OpenMode::ReadWrite);
        let reads = matches!(mode, OpenMode::Reading | OpenMode::ReadWrite);

        if writes && !resolved.perms.contains(Permissions::WRITE) {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        }
        if reads && !resolved.perms.contains(Permissions::READ) {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        }

        let Some(native) = &resolved.native_path else {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        };

        let truncate = writes && rest == RestartPoint::Start;
        let mut file = self
            .backend
            .open_file(native, mode, truncate)
            .await
            .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;

        match rest {
            RestartPoint::Start => {}
            RestartPoint::Append => {
                file.seek(SeekFrom::End(0))
                    .await
                    .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;
            }
            RestartPoint::Offset(offset) => {
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?
                    .len();
                if offset > len {
                    return Err(Error::new(ErrorKind::Other, resolved.tvfs_path));
                }
                file.seek(SeekFrom::Start(offset))
                    .await
                    .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;
                if writes {
                    file.set_len(offset)
                        .await
                        .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;
                }
            }
        }

        Ok(file)
    }

    /// Stats a single entry.
    pub async fn get_entry(&self, path: &str) -> Result<Entry> {
        let resolved = self.resolve_path(path).ok_or_else(|| Error::new(ErrorKind::Invalid, path))?;
        self.resolved_to_entry(resolved).await
    }

    async fn resolved_to_entry(&self, resolved: ResolvedPath) -> Result<Entry> {
        if let Some(native) = &resolved.native_path {
            let info = self
                .backend
                .info(native, true)
                .await
                .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;
            return Ok(Entry {
                tvfs_name: resolved.tvfs_path.clone(),
                native_name: Some(native.clone()),
                entry_type: info.entry_type,
                size: info.size,
                mtime: info.mtime,
                perms: resolved.perms,
            });
        }

        if resolved.mount_children.is_some() {
            // A purely virtual directory: it exists because deeper mounts do.
            return Ok(Entry {
                tvfs_name: resolved.tvfs_path.clone(),
                native_name: None,
                entry_type: EntryType::Dir,
                size: 0,
                mtime: Utc.timestamp_opt(0, 0).unwrap(),
                perms: resolved.perms,
            });
        }

        Err(Error::new(ErrorKind::NoFile, resolved.tvfs_path))
    }

    /// Enumerates `path` according to `mode`.
    pub async fn get_entries(&self, path: &str, mode: TraversalMode) -> Result<EntriesIterator> {
        let resolved = self.resolve_path(path).ok_or_else(|| Error::new(ErrorKind::Invalid, path))?;

        let mode = match mode {
            TraversalMode::Autodetect => {
                let is_dir = match (&resolved.native_path, &resolved.mount_children) {
                    (Some(native), _) => self
                        .backend
                        .info(native, true)
                        .await
                        .map(|i| i.entry_type.is_directory())
                        .unwrap_or(resolved.mount_children.is_some()),
                    (None, Some(_)) => true,
                    (None, None) => false,
                };
                if is_dir {
                    TraversalMode::OnlyChildren
                } else {
                    TraversalMode::NoChildren
                }
            }
            explicit => explicit,
        };

        if mode == TraversalMode::NoChildren {
            let entry = self.resolved_to_entry(resolved).await?;
            return Ok(EntriesIterator::new(vec![entry]));
        }

        let can_list_real = resolved.perms.contains(Permissions::READ);
        let can_list_mounts = resolved.perms.contains(Permissions::LIST_MOUNTS);
        if !can_list_real && !can_list_mounts {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        }

        let mut entries: Vec<Entry> = Vec::new();

        // Mount children first; they win name clashes with real entries.
        if let Some(children) = &resolved.mount_children {
            for child in children {
                let info = match &child.target {
                    Some(target) => self.backend.info(target, true).await.ok(),
                    None => None,
                };
                entries.push(Entry {
                    tvfs_name: child.name.clone(),
                    native_name: child.target.clone(),
                    entry_type: EntryType::Dir,
                    size: info.map(|i| i.size).unwrap_or(0),
                    mtime: info.map(|i| i.mtime).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
                    perms: child.perms,
                });
            }
        }

        if can_list_real {
            if let Some(native) = &resolved.native_path {
                let listed = self
                    .backend
                    .open_directory(native)
                    .await
                    .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;

                for (name, info) in listed {
                    if entries.iter().any(|e| e.tvfs_name == name) {
                        continue; // shadowed by a mount child
                    }
                    entries.push(Entry {
                        tvfs_name: name.clone(),
                        native_name: Some(native.join(&name)),
                        entry_type: info.entry_type,
                        size: info.size,
                        mtime: info.mtime,
                        perms: fixup_child_perms(resolved.perms, info.entry_type),
                    });
                }
            } else if resolved.mount_children.is_none() {
                return Err(Error::new(ErrorKind::NoDir, resolved.tvfs_path));
            }
        }

        Ok(EntriesIterator::new(entries))
    }

    /// Creates a directory. Returns the canonical path of the new directory.
    pub async fn make_directory(&self, path: &str) -> Result<String> {
        let resolved = self.resolve_path(path).ok_or_else(|| Error::new(ErrorKind::Invalid, path))?;

        if !resolved.perms.contains(Permissions::ALLOW_STRUCTURE_MODIFICATION) {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        }
        let Some(native) = &resolved.native_path else {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        };

        self.backend
            .mkdir(native, false)
            .await
            .map_err(|e| Error::from_io(e, resolved.tvfs_path.clone()))?;

        Ok(resolved.tvfs_path)
    }

    /// Sets the modification time of an entry. The returned entry reflects
    /// the new time.
    pub async fn set_mtime(&self, path: &str, mtime: DateTime<Utc>) -> Result<Entry> {
        let mut entry = self.get_entry(path).await?;

        if !entry.perms.contains(Permissions::WRITE) {
            return Err(Error::new(ErrorKind::NoPerm, entry.tvfs_name));
        }
        let Some(native) = entry.native_name.clone() else {
            return Err(Error::new(ErrorKind::NoPerm, entry.tvfs_name));
        };

        self.backend
            .set_mtime(&native, mtime)
            .await
            .map_err(|e| Error::from_io(e, entry.tvfs_name.clone()))?;

        entry.mtime = mtime;
        Ok(entry)
    }

    /// Removes a file. Directories are refused by the backend.
    pub async fn remove_file(&self, path: &str) -> Result<()> {
        let (tvfs_path, native) = self.removable(path)?;
        self.backend
            .remove_file(&native)
            .await
            .map_err(|e| Error::from_io(e, tvfs_path))
    }

    /// Removes an empty directory.
    pub async fn remove_directory(&self, path: &str) -> Result<()> {
        let (tvfs_path, native) = self.removable(path)?;
        self.backend
            .remove_directory(&native)
            .await
            .map_err(|e| Error::from_io(e, tvfs_path))
    }

    /// Removes an already-stat'ed entry by its type.
    pub async fn remove_entry(&self, entry: &Entry) -> Result<()> {
        if !entry.perms.contains(Permissions::REMOVE) {
            return Err(Error::new(ErrorKind::NoPerm, entry.tvfs_name.clone()));
        }
        let Some(native) = &entry.native_name else {
            return Err(Error::new(ErrorKind::NoPerm, entry.tvfs_name.clone()));
        };
        let res = match entry.entry_type {
            EntryType::File | EntryType::Link => self.backend.remove_file(native).await,
            EntryType::Dir => self.backend.remove_directory(native).await,
            EntryType::Unknown => return Err(Error::new(ErrorKind::Other, entry.tvfs_name.clone())),
        };
        res.map_err(|e| Error::from_io(e, entry.tvfs_name.clone()))
    }

    fn removable(&self, path: &str) -> Result<(String, PathBuf)> {
        let resolved = self.resolve_path(path).ok_or_else(|| Error::new(ErrorKind::Invalid, path))?;

        // Mount-tree nodes never carry the REMOVE bit: the virtual overlay
        // cannot be deleted through the VFS, only what the OS owns.
        if !resolved.perms.contains(Permissions::REMOVE) {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        }
        let Some(native) = resolved.native_path else {
            return Err(Error::new(ErrorKind::NoPerm, resolved.tvfs_path));
        };
        Ok((resolved.tvfs_path, native))
    }

    /// Renames an entry. Neither endpoint may be a mount-tree node.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let resolved_from = self.resolve_path(from).ok_or_else(|| Error::new(ErrorKind::Invalid, from))?;
        let resolved_to = self.resolve_path(to).ok_or_else(|| Error::new(ErrorKind::Invalid, to))?;

        if !resolved_from.perms.contains(Permissions::RENAME) || !resolved_to.perms.contains(Permissions::RENAME) {
            return Err(Error::new(ErrorKind::NoPerm, resolved_from.tvfs_path));
        }
        let (Some(native_from), Some(native_to)) = (&resolved_from.native_path, &resolved_to.native_path) else {
            return Err(Error::new(ErrorKind::NoPerm, resolved_from.tvfs_path));
        };

        self.backend
            .rename(native_from, native_to)
            .await
            .map_err(|e| Error::from_io(e, resolved_from.tvfs_path.clone()))
    }

    /// Changes the current directory. The target must be a listable
    /// directory.
    pub async fn set_current_directory(&self, path: &str) -> Result<()> {
        let resolved = self.resolve_path(path).ok_or_else(|| Error::new(ErrorKind::Invalid, path))?;
        let canonical = resolved.tvfs_path.clone();
        let entry = self.resolved_to_entry(resolved).await?;

        if !entry.is_directory() {
            return Err(Error::new(ErrorKind::NoDir, canonical));
        }
        if !entry.perms.intersects(Permissions::READ | Permissions::LIST_MOUNTS) {
            return Err(Error::new(ErrorKind::NoPerm, canonical));
        }

        *self.current_directory.lock().expect("cwd lock") = canonical;
        Ok(())
    }

    // -- synchronous wrappers -------------------------------------------------

    fn block_on_op<T, F>(&self, path_for_error: &str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let (rx, tx) = receiver();
        tokio::spawn(async move {
            let _ = tx.complete(fut.await);
        });
        match rx.receive_sync(self.sync_timeout) {
            Ok(res) => res,
            Err(e) => {
                slog::warn!(self.logger, "synchronous TVFS call did not complete"; "error" => %e);
                Err(Error::new(ErrorKind::Other, path_for_error))
            }
        }
    }

    /// Synchronous [`Engine::open_file`].
    pub fn open_file_sync(&self, path: &str, mode: OpenMode, rest: RestartPoint) -> Result<tokio::fs::File> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.open_file(&owned, mode, rest).await })
    }

    /// Synchronous [`Engine::set_mtime`].
    pub fn set_mtime_sync(&self, path: &str, mtime: DateTime<Utc>) -> Result<Entry> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.set_mtime(&owned, mtime).await })
    }

    /// Synchronous [`Engine::remove_entry`].
    pub fn remove_entry_sync(&self, entry: &Entry) -> Result<()> {
        let engine = self.clone();
        let owned = entry.clone();
        self.block_on_op(&entry.tvfs_name, async move { engine.remove_entry(&owned).await })
    }

    /// Synchronous [`Engine::get_entry`].
    pub fn get_entry_sync(&self, path: &str) -> Result<Entry> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.get_entry(&owned).await })
    }

    /// Synchronous [`Engine::get_entries`].
    pub fn get_entries_sync(&self, path: &str, mode: TraversalMode) -> Result<EntriesIterator> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.get_entries(&owned, mode).await })
    }

    /// Synchronous [`Engine::make_directory`].
    pub fn make_directory_sync(&self, path: &str) -> Result<String> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.make_directory(&owned).await })
    }

    /// Synchronous [`Engine::set_current_directory`].
    pub fn set_current_directory_sync(&self, path: &str) -> Result<()> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.set_current_directory(&owned).await })
    }

    /// Synchronous [`Engine::remove_file`].
    pub fn remove_file_sync(&self, path: &str) -> Result<()> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.remove_file(&owned).await })
    }

    /// Synchronous [`Engine::remove_directory`].
    pub fn remove_directory_sync(&self, path: &str) -> Result<()> {
        let engine = self.clone();
        let owned = path.to_string();
        self.block_on_op(path, async move { engine.remove_directory(&owned).await })
    }

    /// Synchronous [`Engine::rename`].
    pub fn rename_sync(&self, from: &str, to: &str) -> Result<()> {
        let engine = self.clone();
        let owned_from = from.to_string();
        let owned_to = to.to_string();
        self.block_on_op(from, async move { engine.rename(&owned_from, &owned_to).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvfs::mount::{mount, MountAccess, MountPoint, MountRecursion};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn engine_with(table: Vec<MountPoint>) -> Engine {
        Engine::new(
            test_logger(),
            Arc::new(MountTree::from_table(table)),
            None,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn mount_hole_lists_exactly_the_mount() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(vec![mount("/foo/bar", dir.path())]);

        let root: Vec<_> = engine.get_entries("/", TraversalMode::OnlyChildren).await.unwrap().collect();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].tvfs_name, "foo");
        assert_eq!(root[0].entry_type, EntryType::Dir);

        let foo: Vec<_> = engine.get_entries("/foo", TraversalMode::OnlyChildren).await.unwrap().collect();
        assert_eq!(foo.len(), 1);
        assert_eq!(foo[0].tvfs_name, "bar");
    }

    #[tokio::test]
    async fn mkdir_refused_in_hole_allowed_in_mount() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(vec![mount("/foo/bar", dir.path())]);

        let err = engine.make_directory("/foo/qux").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPerm);

        let created = engine.make_directory("/foo/bar/qux").await.unwrap();
        assert_eq!(created, "/foo/bar/qux");
        assert!(dir.path().join("qux").is_dir());
    }

    #[tokio::test]
    async fn mount_children_shadow_real_entries() {
        let dir = tempfile::tempdir().unwrap();
        let inner = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("real.txt"), b"x").unwrap();

        let engine = engine_with(vec![mount("/", dir.path()), mount("/sub", inner.path())]);

        let listed: Vec<_> = engine.get_entries("/", TraversalMode::OnlyChildren).await.unwrap().collect();
        let subs: Vec<_> = listed.iter().filter(|e| e.tvfs_name == "sub").collect();
        assert_eq!(subs.len(), 1, "duplicate names must be suppressed");
        // The mount child won: it points at the inner directory.
        assert_eq!(subs[0].native_name.as_deref(), Some(inner.path()));
    }

    #[tokio::test]
    async fn open_for_write_needs_write_access() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"data").unwrap();
        let engine = engine_with(vec![MountPoint {
            access: MountAccess::ReadOnly,
            ..mount("/ro", dir.path())
        }]);

        let err = engine
            .open_file("/ro/f", OpenMode::Writing, RestartPoint::Start)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPerm);

        // Reading is fine.
        let mut file = engine.open_file("/ro/f", OpenMode::Reading, RestartPoint::Start).await.unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "data");
    }

    #[tokio::test]
    async fn rest_seeks_and_rejects_past_eof() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"0123456789").unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        let mut file = engine
            .open_file("/f", OpenMode::Reading, RestartPoint::Offset(5))
            .await
            .unwrap();
        let mut rest = String::new();
        file.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "56789");

        let err = engine
            .open_file("/f", OpenMode::Reading, RestartPoint::Offset(11))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[tokio::test]
    async fn append_continues_at_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"hello").unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        let mut file = engine
            .open_file("/f", OpenMode::Writing, RestartPoint::Append)
            .await
            .unwrap();
        file.write_all(b" world").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(dir.path().join("f")).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn mount_point_cannot_be_removed_or_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(vec![mount("/a", dir.path())]);

        assert_eq!(engine.remove_directory("/a").await.unwrap_err().kind(), ErrorKind::NoPerm);
        assert_eq!(engine.rename("/a", "/c").await.unwrap_err().kind(), ErrorKind::NoPerm);
    }

    #[tokio::test]
    async fn rename_across_mounts() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("f"), b"payload").unwrap();

        let engine = engine_with(vec![mount("/a", a.path()), mount("/b", b.path())]);
        engine.rename("/a/f", "/b/g").await.unwrap();

        assert!(!a.path().join("f").exists());
        assert_eq!(std::fs::read_to_string(b.path().join("g")).unwrap(), "payload");
    }

    #[tokio::test]
    async fn remove_directory_requires_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("full")).unwrap();
        std::fs::write(dir.path().join("full/x"), b"x").unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        assert!(engine.remove_directory("/full").await.is_err());
        std::fs::remove_file(dir.path().join("full/x")).unwrap();
        engine.remove_directory("/full").await.unwrap();
    }

    #[tokio::test]
    async fn remove_file_on_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);
        assert!(engine.remove_file("/d").await.is_err());
    }

    #[tokio::test]
    async fn cwd_is_canonical_and_checked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pub")).unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        engine.set_current_directory("/pub/./../pub").await.unwrap();
        assert_eq!(engine.current_directory(), "/pub");

        let err = engine.set_current_directory("/missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoFile);
    }

    #[tokio::test]
    async fn cwd_into_file_is_nodir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"").unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        let err = engine.set_current_directory("/f").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoDir);
    }

    #[tokio::test]
    async fn below_non_recursive_mount_permissions_collapse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("deep/deeper")).unwrap();
        std::fs::write(dir.path().join("deep/deeper/f"), b"x").unwrap();

        let engine = engine_with(vec![MountPoint {
            recursive: MountRecursion::None,
            ..mount("/m", dir.path())
        }]);

        // Direct children keep the mount's permissions...
        assert!(engine.get_entry("/m/deep").await.is_ok());
        // ...but two levels down everything collapses.
        let err = engine
            .open_file("/m/deep/deeper/f", OpenMode::Reading, RestartPoint::Start)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPerm);
    }

    #[tokio::test]
    async fn listed_subdirectories_obey_recursion_flags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("file.txt"), b"x").unwrap();

        // Non-recursive mount: sub-directory entries are inaccessible.
        let engine = engine_with(vec![MountPoint {
            recursive: MountRecursion::None,
            ..mount("/m", dir.path())
        }]);
        let listed: Vec<_> = engine.get_entries("/m", TraversalMode::OnlyChildren).await.unwrap().collect();
        let sub = listed.iter().find(|e| e.tvfs_name == "sub").unwrap();
        assert_eq!(sub.perms, Permissions::empty());
        // Files keep the resolved permissions untouched.
        let file = listed.iter().find(|e| e.tvfs_name == "file.txt").unwrap();
        assert!(file.perms.contains(Permissions::READ | Permissions::WRITE));

        // Recursive but without structure modification: no remove/rename on
        // sub-directories.
        let engine = engine_with(vec![MountPoint {
            recursive: MountRecursion::Recurse,
            ..mount("/m", dir.path())
        }]);
        let listed: Vec<_> = engine.get_entries("/m", TraversalMode::OnlyChildren).await.unwrap().collect();
        let sub = listed.iter().find(|e| e.tvfs_name == "sub").unwrap();
        assert!(!sub.perms.intersects(Permissions::REMOVE | Permissions::RENAME));
        assert!(sub.perms.contains(Permissions::READ));
    }

    #[tokio::test]
    async fn set_mtime_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        let stamp = Utc.with_ymd_and_hms(2020, 2, 2, 2, 2, 2).unwrap();
        let entry = engine.set_mtime("/f", stamp).await.unwrap();
        assert_eq!(entry.mtime, stamp);

        let fresh = engine.get_entry("/f").await.unwrap();
        assert_eq!(fresh.mtime, stamp);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_wrappers_complete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let engine = engine_with(vec![mount("/", dir.path())]);

        let entry = tokio::task::spawn_blocking(move || engine.get_entry_sync("/f")).await.unwrap().unwrap();
        assert_eq!(entry.entry_type, EntryType::File);
    }
}
