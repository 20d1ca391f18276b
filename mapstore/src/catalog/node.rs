//! Region identity and node types for the catalog tree.

use serde::Deserialize;

/// Opaque region identifier, unique within a catalog version.
///
/// Stable across app updates for the same physical region. A disputed region
/// id may be claimed by more than one node in the hierarchy.
pub type RegionId = String;

/// Describes the downloadable data file of a leaf region.
///
/// Immutable once loaded; one per leaf region per catalog version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileDescriptor {
    /// File name on the server, without version directory or extension.
    pub name: String,

    /// Size of the full data file on the server, in bytes.
    pub remote_size: u64,

    /// Base64-encoded SHA-1 digest of the full data file.
    pub sha1_base64: String,
}

/// Index of a node inside the catalog arena.
pub(crate) type NodeIdx = usize;

/// A node in the region hierarchy.
///
/// Leaves carry a [`FileDescriptor`]; group nodes carry children. A node
/// never has both.
#[derive(Debug, Clone)]
pub struct RegionNode {
    /// Region id. Disputed ids appear on several nodes.
    pub id: RegionId,

    /// Parent arena index; `None` for the root.
    pub(crate) parent: Option<NodeIdx>,

    /// Child arena indices, in catalog order.
    pub(crate) children: Vec<NodeIdx>,

    /// File descriptor, present iff this node is a leaf.
    pub descriptor: Option<FileDescriptor>,

    /// Total remote bytes of all leaves in this subtree.
    pub subtree_size: u64,

    /// Number of leaf files in this subtree.
    pub subtree_file_count: u32,
}

impl RegionNode {
    /// Whether this node describes exactly one downloadable file.
    pub fn is_leaf(&self) -> bool {
        self.descriptor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_has_descriptor() {
        let node = RegionNode {
            id: "Freedonia".to_string(),
            parent: Some(0),
            children: Vec::new(),
            descriptor: Some(FileDescriptor {
                name: "Freedonia".to_string(),
                remote_size: 1000,
                sha1_base64: "abc=".to_string(),
            }),
            subtree_size: 1000,
            subtree_file_count: 1,
        };
        assert!(node.is_leaf());
    }

    #[test]
    fn test_group_is_not_leaf() {
        let node = RegionNode {
            id: "Continent".to_string(),
            parent: None,
            children: vec![1, 2],
            descriptor: None,
            subtree_size: 2000,
            subtree_file_count: 2,
        };
        assert!(!node.is_leaf());
    }
}
