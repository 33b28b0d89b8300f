//! Mount points and the mount tree.
//!
//! A user's namespace is configured as a flat table of mount points. The
//! table compiles into an ordered tree keyed by path segment; intermediate
//! nodes that exist only because a deeper mount was configured ("mount-tree
//! holes") are listable but carry no other rights.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::backend::Backend;
use super::path::PathElements;
use super::permissions::Permissions;

/// What a mount point allows on its own subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountAccess {
    /// The mount exists but nothing is permitted.
    Disabled,
    /// Reading and listing only.
    ReadOnly,
    /// Reading, listing and writing.
    #[default]
    ReadWrite,
}

/// Whether the mount's permissions reach below its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountRecursion {
    /// Permissions apply to the mount root's direct contents only.
    None,
    /// Permissions apply recursively.
    Recurse,
    /// Permissions apply recursively and directories may be created, renamed
    /// and removed.
    #[default]
    RecurseAndAllowStructureModification,
}

bitflags! {
    /// Auxiliary mount behaviour.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MountFlags: u8 {
        /// Create the native directory chain when the user's tree is built.
        const AUTOCREATE = 1;
    }
}

/// One entry of a user's mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// The unix-style virtual path of the mount.
    pub tvfs_path: String,
    /// The native directory backing the mount. Empty for purely virtual
    /// mounts.
    pub native_path: PathBuf,
    /// Access rights on the subtree.
    pub access: MountAccess,
    /// Recursion behaviour.
    pub recursive: MountRecursion,
    /// Auxiliary flags.
    pub flags: MountFlags,
}

/// A user's mount table.
pub type MountTable = Vec<MountPoint>;

fn access_to_perms(access: MountAccess) -> Permissions {
    match access {
        MountAccess::ReadOnly => Permissions::READ | Permissions::LIST_MOUNTS,
        MountAccess::ReadWrite => Permissions::READ | Permissions::LIST_MOUNTS | Permissions::WRITE,
        MountAccess::Disabled => Permissions::empty(),
    }
}

fn recursion_to_perms(recursive: MountRecursion) -> Permissions {
    match recursive {
        MountRecursion::Recurse => Permissions::APPLY_RECURSIVELY,
        MountRecursion::RecurseAndAllowStructureModification => {
            Permissions::APPLY_RECURSIVELY | Permissions::ALLOW_STRUCTURE_MODIFICATION
        }
        MountRecursion::None => Permissions::empty(),
    }
}

/// A node of the compiled tree.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Child nodes, in insertion order.
    pub children: Vec<(String, Node)>,
    /// The native target, when the node is backed by the filesystem.
    pub target: Option<PathBuf>,
    /// Effective permissions at the node.
    pub perms: Permissions,
    /// Mount flags carried over from the table.
    pub flags: MountFlags,
}

impl Node {
    fn new(perms: Permissions) -> Self {
        Node {
            perms,
            ..Node::default()
        }
    }

    /// Finds a direct child by name.
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    fn find_mut(&mut self, name: &str) -> Option<usize> {
        self.children.iter().position(|(n, _)| n == name)
    }
}

/// The compiled, per-user mount tree.
#[derive(Debug, Clone)]
pub struct MountTree {
    root: Node,
}

impl Default for MountTree {
    fn default() -> Self {
        MountTree {
            root: Node::new(Permissions::LIST_MOUNTS),
        }
    }
}

impl MountTree {
    /// An empty tree: only the root exists, listable and nothing else.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles a mount table into a tree.
    pub fn from_table(table: MountTable) -> Self {
        let mut tree = Self::new();
        tree.merge_with(table);
        tree
    }

    /// The root node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Merges a mount table into the tree.
    ///
    /// Mounts are sorted by canonicalized path first, so a parent mount is
    /// always inserted before its children and intermediate nodes can inherit
    /// from it.
    pub fn merge_with(&mut self, mut table: MountTable) -> &mut Self {
        table.sort_by_cached_key(|mp| PathElements::resolve("/", &mp.tvfs_path).unwrap_or_default());

        for mp in table {
            let Some(elements) = PathElements::resolve("/", &mp.tvfs_path) else {
                continue;
            };

            let mut node = &mut self.root;
            let count = elements.len();

            for (i, element) in elements.iter().enumerate() {
                let is_last = i + 1 == count;

                let idx = match node.find_mut(element) {
                    Some(idx) => idx,
                    None => {
                        let mut fresh = Node::new(Permissions::LIST_MOUNTS);
                        if !is_last {
                            if let Some(parent_target) = &node.target {
                                fresh.target = Some(parent_target.join(element));
                                if node.perms.contains(Permissions::APPLY_RECURSIVELY) {
                                    fresh.perms = node.perms;
                                }
                            }
                        }
                        node.children.push((element.to_string(), fresh));
                        node.children.len() - 1
                    }
                };

                node = &mut node.children[idx].1;
            }

            node.target = if mp.native_path.as_os_str().is_empty() {
                None
            } else {
                Some(mp.native_path.clone())
            };
            node.perms = access_to_perms(mp.access) | recursion_to_perms(mp.recursive);
            node.flags = mp.flags;
        }

        self
    }

    /// Walks the tree along `elements`, returning the deepest matched node
    /// and how many elements matched.
    pub fn find_node<'t>(&'t self, elements: &PathElements) -> (&'t Node, usize) {
        let mut node = &self.root;
        let mut matched = 0;

        for element in elements.iter() {
            match node.find(element) {
                Some(next) => {
                    node = next;
                    matched += 1;
                }
                None => break,
            }
        }

        (node, matched)
    }

    /// Creates the native directories of every `AUTOCREATE` mount, depth
    /// first.
    pub async fn autocreate_directories(&self, backend: &dyn Backend) {
        let mut stack: Vec<&Node> = vec![&self.root];
        while let Some(node) = stack.pop() {
            if node.flags.contains(MountFlags::AUTOCREATE) {
                if let Some(target) = &node.target {
                    // Best effort; a failure surfaces later when the mount is
                    // actually used.
                    let _ = backend.mkdir(target, true).await;
                }
            }
            stack.extend(node.children.iter().map(|(_, n)| n));
        }
    }
}

/// Convenience constructor for the common read-write recursive mount.
pub fn mount(tvfs_path: &str, native_path: impl AsRef<Path>) -> MountPoint {
    MountPoint {
        tvfs_path: tvfs_path.to_string(),
        native_path: native_path.as_ref().to_path_buf(),
        access: MountAccess::ReadWrite,
        recursive: MountRecursion::RecurseAndAllowStructureModification,
        flags: MountFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn elements(p: &str) -> PathElements {
        PathElements::resolve("/", p).unwrap()
    }

    #[test]
    fn deep_mount_creates_listable_holes() {
        let tree = MountTree::from_table(vec![mount("/foo/bar", "/tmp/x")]);

        let (node, matched) = tree.find_node(&elements("/foo"));
        assert_eq!(matched, 1);
        assert_eq!(node.perms, Permissions::LIST_MOUNTS);
        assert_eq!(node.target, None);

        let (node, matched) = tree.find_node(&elements("/foo/bar"));
        assert_eq!(matched, 2);
        assert!(node.perms.contains(Permissions::READ | Permissions::WRITE));
        assert_eq!(node.target.as_deref(), Some(Path::new("/tmp/x")));
    }

    #[test]
    fn recursive_parent_propagates_into_intermediates() {
        let tree = MountTree::from_table(vec![
            mount("/data", "/srv/data"),
            mount("/data/sub/deep", "/srv/other"),
        ]);

        // /data/sub exists only because of the deeper mount, but /data is a
        // real recursive mount, so the hole inherits its permissions and a
        // composed target.
        let (node, matched) = tree.find_node(&elements("/data/sub"));
        assert_eq!(matched, 2);
        assert!(node.perms.contains(Permissions::READ | Permissions::WRITE | Permissions::APPLY_RECURSIVELY));
        assert_eq!(node.target.as_deref(), Some(Path::new("/srv/data/sub")));
    }

    #[test]
    fn non_recursive_parent_leaves_list_only_intermediates() {
        let tree = MountTree::from_table(vec![
            MountPoint {
                recursive: MountRecursion::None,
                ..mount("/data", "/srv/data")
            },
            mount("/data/sub/deep", "/srv/other"),
        ]);

        let (node, _) = tree.find_node(&elements("/data/sub"));
        assert_eq!(node.perms, Permissions::LIST_MOUNTS);
    }

    #[test]
    fn unmatched_tail_is_reported() {
        let tree = MountTree::from_table(vec![mount("/a", "/srv/a")]);
        let (node, matched) = tree.find_node(&elements("/a/b/c"));
        assert_eq!(matched, 1);
        assert!(node.target.is_some());
    }

    #[test]
    fn sorted_insertion_makes_parent_exist_first() {
        // Note the child listed before the parent; sorting fixes the order.
        let tree = MountTree::from_table(vec![mount("/a/b", "/srv/b"), mount("/a", "/srv/a")]);

        let (node, matched) = tree.find_node(&elements("/a"));
        assert_eq!(matched, 1);
        assert_eq!(node.target.as_deref(), Some(Path::new("/srv/a")));

        let (node, matched) = tree.find_node(&elements("/a/b"));
        assert_eq!(matched, 2);
        assert_eq!(node.target.as_deref(), Some(Path::new("/srv/b")));
    }

    #[test]
    fn disabled_mount_has_no_rights() {
        let tree = MountTree::from_table(vec![MountPoint {
            access: MountAccess::Disabled,
            ..mount("/locked", "/srv/locked")
        }]);
        let (node, _) = tree.find_node(&elements("/locked"));
        assert_eq!(node.perms & !Permissions::APPLY_RECURSIVELY & !Permissions::ALLOW_STRUCTURE_MODIFICATION, Permissions::empty());
    }
}
