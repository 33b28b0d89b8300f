//! The per-node permission bitset.

use bitflags::bitflags;

bitflags! {
    /// What a user may do at a point of the virtual namespace.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permissions: u8 {
        /// Can be read from.
        const READ = 1 << 0;
        /// Can be written to.
        const WRITE = 1 << 1;
        /// Can be renamed.
        const RENAME = 1 << 2;
        /// Can be deleted.
        const REMOVE = 1 << 3;
        /// Directories only: mount-point children stay listable even when the
        /// READ bit is absent and real entries are hidden.
        const LIST_MOUNTS = 1 << 4;
        /// Directories only: the permissions also apply below this node.
        const APPLY_RECURSIVELY = 1 << 5;
        /// Directories only: subdirectories may be created, renamed, removed.
        const ALLOW_STRUCTURE_MODIFICATION = 1 << 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_means_nothing_allowed() {
        let p = Permissions::empty();
        assert!(!p.contains(Permissions::READ));
        assert!(!p.intersects(Permissions::all()));
    }
}
