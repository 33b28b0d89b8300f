//! Entries: what enumeration and stat operations yield.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};

use super::permissions::Permissions;

/// The type of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link.
    Link,
    /// Something else, or something we could not classify.
    Unknown,
}

impl EntryType {
    /// Tells whether the entry can be CWD'd into / enumerated.
    pub fn is_directory(self) -> bool {
        self == EntryType::Dir
    }
}

/// One entry of the virtual namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The name in the virtual namespace. For enumerations this is the bare
    /// child name; for single-entry stats the full canonical path.
    pub tvfs_name: String,
    /// The backing native path, when the entry is not purely virtual.
    pub native_name: Option<PathBuf>,
    /// File, directory, link or unknown.
    pub entry_type: EntryType,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, UTC, millisecond resolution.
    pub mtime: DateTime<Utc>,
    /// Effective permissions at the entry.
    pub perms: Permissions,
}

impl Entry {
    /// Tells whether the entry is a directory.
    pub fn is_directory(&self) -> bool {
        self.entry_type.is_directory()
    }

    /// The mtime truncated to the resolution the wire formats carry.
    pub fn mtime_rfc3339_millis(&self) -> String {
        self.mtime.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Iterator over the entries produced by a TVFS enumeration.
///
/// The union of backend entries and mount children is computed up front when
/// iteration begins; duplicate names are resolved in favour of the mount
/// child.
#[derive(Debug, Default)]
pub struct EntriesIterator {
    entries: std::vec::IntoIter<Entry>,
}

impl EntriesIterator {
    pub(crate) fn new(entries: Vec<Entry>) -> Self {
        EntriesIterator {
            entries: entries.into_iter(),
        }
    }

    /// How many entries remain.
    pub fn len(&self) -> usize {
        self.entries.as_slice().len()
    }

    /// Tells whether the iteration is exhausted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for EntriesIterator {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.entries.next()
    }
}
