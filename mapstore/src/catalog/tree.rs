//! Immutable region tree with disputed-id lookup.
//!
//! The catalog is an arena of [`RegionNode`]s plus an index from region id to
//! every node claiming that id. Most ids map to a single node; disputed
//! territories map to several, and every query that walks the hierarchy must
//! visit all owning nodes.

use std::collections::HashMap;

use super::node::{FileDescriptor, NodeIdx, RegionId, RegionNode};
use super::CatalogError;

/// Result of looking a region id up in the catalog.
#[derive(Debug)]
pub enum Found<'a> {
    /// The id is claimed by exactly one node.
    Single(&'a RegionNode),
    /// The id is claimed by several nodes (disputed territory).
    Disputed(Vec<&'a RegionNode>),
}

impl<'a> Found<'a> {
    /// First owning node, in catalog order.
    pub fn first(&self) -> &'a RegionNode {
        match self {
            Found::Single(node) => node,
            // Loader guarantees disputed entries are non-empty.
            Found::Disputed(nodes) => nodes[0],
        }
    }

    /// All owning nodes.
    pub fn all(&self) -> Vec<&'a RegionNode> {
        match self {
            Found::Single(node) => vec![node],
            Found::Disputed(nodes) => nodes.clone(),
        }
    }
}

/// Immutable-after-load hierarchical tree of regions.
///
/// Replaced wholesale when a newer catalog is fetched; never mutated.
#[derive(Debug)]
pub struct RegionCatalog {
    /// Data version this catalog describes.
    version: i64,

    /// Node arena; index 0 is the root.
    nodes: Vec<RegionNode>,

    /// Region id -> arena indices of every owning node.
    index: HashMap<RegionId, Vec<NodeIdx>>,
}

impl RegionCatalog {
    pub(crate) fn from_parts(
        version: i64,
        nodes: Vec<RegionNode>,
        index: HashMap<RegionId, Vec<NodeIdx>>,
    ) -> Self {
        Self {
            version,
            nodes,
            index,
        }
    }

    /// Data version of this catalog.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Id of the single root node.
    pub fn root_id(&self) -> &RegionId {
        &self.nodes[0].id
    }

    /// Whether the id exists anywhere in the hierarchy.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Look up every node owning `id`.
    pub fn find(&self, id: &str) -> Option<Found<'_>> {
        let indices = self.index.get(id)?;
        if indices.len() == 1 {
            Some(Found::Single(&self.nodes[indices[0]]))
        } else {
            Some(Found::Disputed(
                indices.iter().map(|&i| &self.nodes[i]).collect(),
            ))
        }
    }

    /// First node owning `id`, in catalog order.
    pub fn find_first(&self, id: &str) -> Option<&RegionNode> {
        self.index.get(id).map(|indices| &self.nodes[indices[0]])
    }

    /// Whether the id is claimed by more than one parent.
    pub fn is_disputed(&self, id: &str) -> bool {
        self.index.get(id).is_some_and(|v| v.len() > 1)
    }

    /// Whether the id refers to a leaf (downloadable) region.
    pub fn is_leaf(&self, id: &str) -> bool {
        self.find_first(id).is_some_and(RegionNode::is_leaf)
    }

    /// Child region ids of `id`, in catalog order.
    pub fn children(&self, id: &str) -> Option<Vec<RegionId>> {
        let node = self.find_first(id)?;
        Some(
            node.children
                .iter()
                .map(|&c| self.nodes[c].id.clone())
                .collect(),
        )
    }

    /// File descriptor of a leaf region.
    pub fn descriptor(&self, id: &str) -> Result<&FileDescriptor, CatalogError> {
        let node = self
            .find_first(id)
            .ok_or_else(|| CatalogError::UnknownRegion(id.to_string()))?;
        node.descriptor
            .as_ref()
            .ok_or_else(|| CatalogError::NotLeaf(id.to_string()))
    }

    /// Ancestor ids of `id`, nearest parent first, root last.
    ///
    /// For disputed ids the ancestor chains of all owning nodes are merged;
    /// each ancestor appears once. Ancestors shared between chains (the root
    /// in particular) sort after the chain-specific ones, by tree depth.
    pub fn ancestors(&self, id: &str) -> Vec<RegionId> {
        let Some(indices) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<(usize, RegionId)> = Vec::new();
        for &idx in indices {
            let mut current = self.nodes[idx].parent;
            while let Some(p) = current {
                let node = &self.nodes[p];
                if !out.iter().any(|(_, a)| a == &node.id) {
                    out.push((self.depth(p), node.id.clone()));
                }
                current = node.parent;
            }
        }
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out.into_iter().map(|(_, ancestor)| ancestor).collect()
    }

    /// Edge distance from the root.
    fn depth(&self, idx: NodeIdx) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[idx].parent;
        while let Some(p) = current {
            depth += 1;
            current = self.nodes[p].parent;
        }
        depth
    }

    /// Visit every node of the subtree rooted at the first node owning `id`,
    /// the root of the subtree included, depth first in catalog order.
    pub fn for_each_in_subtree<F: FnMut(&RegionNode)>(&self, id: &str, mut f: F) {
        let Some(indices) = self.index.get(id) else {
            return;
        };
        self.walk(indices[0], &mut f);
    }

    fn walk<F: FnMut(&RegionNode)>(&self, idx: NodeIdx, f: &mut F) {
        let node = &self.nodes[idx];
        f(node);
        for &child in &node.children {
            self.walk(child, f);
        }
    }

    /// Leaf region ids under `id` (including `id` itself when it is a leaf),
    /// in catalog order. Disputed leaves may repeat; callers that must count
    /// each region once should de-duplicate.
    pub fn leaves_under(&self, id: &str) -> Vec<RegionId> {
        let mut leaves = Vec::new();
        self.for_each_in_subtree(id, |node| {
            if node.is_leaf() {
                leaves.push(node.id.clone());
            }
        });
        leaves
    }

    /// All leaf region ids in the catalog, de-duplicated.
    pub fn all_leaves(&self) -> Vec<RegionId> {
        let mut seen = std::collections::HashSet::new();
        let mut leaves = Vec::new();
        for node in &self.nodes {
            if node.is_leaf() && seen.insert(node.id.clone()) {
                leaves.push(node.id.clone());
            }
        }
        leaves
    }

    /// Find the region id owning a given file name, if any.
    pub fn region_for_file(&self, file_name: &str) -> Option<&RegionId> {
        self.nodes
            .iter()
            .find(|n| {
                n.descriptor
                    .as_ref()
                    .is_some_and(|d| d.name == file_name)
            })
            .map(|n| &n.id)
    }
}
