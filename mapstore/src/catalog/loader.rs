//! Catalog document parsing and validation.
//!
//! The catalog is a versioned JSON document:
//!
//! ```json
//! {
//!   "format": 1,
//!   "version": 220101,
//!   "root": {
//!     "id": "World",
//!     "children": [
//!       { "id": "Freedonia", "file": "Freedonia", "size": 1000, "sha1": "…" }
//!     ]
//!   }
//! }
//! ```
//!
//! Group nodes carry `children` (and optionally a declared `size` checked
//! against the computed subtree sum); leaves carry `file`/`size`/`sha1`.
//! Unknown format versions are rejected before any node is examined.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::info;

use super::node::{FileDescriptor, NodeIdx, RegionNode};
use super::tree::RegionCatalog;
use super::CatalogError;

/// The only catalog format this loader understands.
const SUPPORTED_FORMAT: u32 = 1;

/// Allowed drift between a group's declared size and the computed sum of its
/// leaves, in bytes. Catalog generators round sizes per file.
const SIZE_SUM_TOLERANCE: u64 = 1024;

#[derive(Debug, Deserialize)]
struct CatalogDoc {
    format: u32,
    version: i64,
    root: NodeDoc,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    id: String,
    #[serde(default)]
    children: Vec<NodeDoc>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    sha1: Option<String>,
}

/// Parse and validate a catalog document.
pub fn load_catalog(json: &str) -> Result<RegionCatalog, CatalogError> {
    let doc: CatalogDoc = serde_json::from_str(json)?;

    if doc.format != SUPPORTED_FORMAT {
        return Err(CatalogError::UnsupportedFormat(doc.format));
    }
    if doc.version <= 0 {
        return Err(CatalogError::Corrupt(format!(
            "non-positive data version {}",
            doc.version
        )));
    }

    let mut builder = Builder::default();
    let root = builder.build(&doc.root, None, &mut Vec::new())?;
    debug_assert_eq!(root, 0);

    let catalog = RegionCatalog::from_parts(doc.version, builder.nodes, builder.index);
    info!(
        version = catalog.version(),
        leaves = catalog.all_leaves().len(),
        "loaded region catalog"
    );
    Ok(catalog)
}

#[derive(Default)]
struct Builder {
    nodes: Vec<RegionNode>,
    index: HashMap<String, Vec<NodeIdx>>,
}

impl Builder {
    /// Depth-first construction. `path` holds the ids of the ancestors of the
    /// node being built; an id reappearing on its own path means the
    /// hierarchy loops back on itself.
    fn build(
        &mut self,
        doc: &NodeDoc,
        parent: Option<NodeIdx>,
        path: &mut Vec<String>,
    ) -> Result<NodeIdx, CatalogError> {
        if doc.id.is_empty() {
            return Err(CatalogError::Corrupt("node with empty id".to_string()));
        }
        if path.iter().any(|p| p == &doc.id) {
            return Err(CatalogError::Corrupt(format!(
                "cycle through region {}",
                doc.id
            )));
        }

        let is_leaf = doc.file.is_some();
        if is_leaf && !doc.children.is_empty() {
            return Err(CatalogError::Corrupt(format!(
                "region {} has both a file and children",
                doc.id
            )));
        }
        if !is_leaf && doc.children.is_empty() {
            return Err(CatalogError::Corrupt(format!(
                "group region {} has no children",
                doc.id
            )));
        }

        let idx = self.nodes.len();
        self.nodes.push(RegionNode {
            id: doc.id.clone(),
            parent,
            children: Vec::new(),
            descriptor: None,
            subtree_size: 0,
            subtree_file_count: 0,
        });
        self.index.entry(doc.id.clone()).or_default().push(idx);

        if is_leaf {
            let size = doc
                .size
                .ok_or_else(|| CatalogError::Corrupt(format!("leaf {} missing size", doc.id)))?;
            let sha1 = doc
                .sha1
                .clone()
                .ok_or_else(|| CatalogError::Corrupt(format!("leaf {} missing sha1", doc.id)))?;
            let node = &mut self.nodes[idx];
            node.descriptor = Some(FileDescriptor {
                name: doc.file.clone().unwrap_or_default(),
                remote_size: size,
                sha1_base64: sha1,
            });
            node.subtree_size = size;
            node.subtree_file_count = 1;
            return Ok(idx);
        }

        let mut seen_children = HashSet::new();
        let mut subtree_size = 0u64;
        let mut subtree_file_count = 0u32;

        path.push(doc.id.clone());
        for child in &doc.children {
            if !seen_children.insert(child.id.as_str()) {
                path.pop();
                return Err(CatalogError::Corrupt(format!(
                    "duplicate child {} under {}",
                    child.id, doc.id
                )));
            }
            let child_idx = self.build(child, Some(idx), path)?;
            subtree_size += self.nodes[child_idx].subtree_size;
            subtree_file_count += self.nodes[child_idx].subtree_file_count;
            self.nodes[idx].children.push(child_idx);
        }
        path.pop();

        if let Some(declared) = doc.size {
            if declared.abs_diff(subtree_size) > SIZE_SUM_TOLERANCE {
                return Err(CatalogError::Corrupt(format!(
                    "group {} declares {} bytes but children sum to {}",
                    doc.id, declared, subtree_size
                )));
            }
        }

        let node = &mut self.nodes[idx];
        node.subtree_size = subtree_size;
        node.subtree_file_count = subtree_file_count;
        Ok(idx)
    }
}
