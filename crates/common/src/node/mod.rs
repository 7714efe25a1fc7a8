//! Node data structures and their wire format
//!
//! Every stored object is one of three immutable node kinds, addressed by the
//! hash of its canonical encoding:
//!
//! - **chunk**: raw bytes, at most `node_limit - HEADER_SIZE` of them
//! - **file**: ordered child references (chunks, or nested file nodes for
//!   very large files), a content type and the total logical size
//! - **collection**: a name-sorted map of child references with the
//!   aggregate size of everything below it
//!
//! ```text
//!                collection (root)
//!                 |            |
//!            "doc.bin"      "notes"
//!                 |            |
//!              file         collection
//!            /   |   \          |
//!        chunk chunk file     "a.txt" -> file -> chunk
//!                    /  \
//!                chunk  chunk
//! ```
//!
//! Child references carry the child's logical size inline so readers can
//! find the byte range covered by each child without fetching it.

mod codec;
mod layout;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::hash::Key;

pub use codec::{empty_collection_bytes, empty_collection_key, CodecError, Header};
pub use codec::{CHILD_REF_SIZE, HEADER_SIZE, MAGIC, VERSION};
pub use layout::{build_collection, build_file_tree, split_into_chunks, FileTree, LayoutError};
pub(crate) use layout::validate_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Chunk,
    File,
    Collection,
}

impl NodeKind {
    pub fn as_u8(&self) -> u8 {
        match self {
            NodeKind::Chunk => 0,
            NodeKind::File => 1,
            NodeKind::Collection => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NodeKind::Chunk),
            1 => Some(NodeKind::File),
            2 => Some(NodeKind::Collection),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Chunk => "chunk",
            NodeKind::File => "file",
            NodeKind::Collection => "collection",
        };
        f.write_str(s)
    }
}

/// A reference from a parent node to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildRef {
    pub key: Key,
    /// Logical size of the child (payload bytes for chunks, total size
    ///  for files and collections)
    pub size: u64,
}

impl ChildRef {
    pub fn new(key: Key, size: u64) -> Self {
        Self { key, size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    content_type: String,
    size: u64,
    // height of the subtree below this node; 1 means the children
    //  are chunks, n > 1 means they are file nodes of height n - 1
    depth: u16,
    children: Vec<ChildRef>,
}

impl FileNode {
    pub(crate) fn new(content_type: String, depth: u16, children: Vec<ChildRef>) -> Result<Self, LayoutError> {
        let size = codec::sum_sizes(children.iter()).ok_or(LayoutError::SizeOverflow)?;
        Ok(Self {
            content_type,
            size,
            depth,
            children,
        })
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Whether the children of this node are chunks rather than file nodes
    pub fn is_leaf_level(&self) -> bool {
        self.depth <= 1
    }

    pub fn view(&self) -> FileView {
        FileView {
            chunks: self.children.iter().map(|c| c.key).collect(),
            content_type: self.content_type.clone(),
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionNode {
    size: u64,
    children: BTreeMap<String, ChildRef>,
}

impl CollectionNode {
    pub(crate) fn new(children: BTreeMap<String, ChildRef>) -> Result<Self, LayoutError> {
        let size = codec::sum_sizes(children.values()).ok_or(LayoutError::SizeOverflow)?;
        Ok(Self { size, children })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn get(&self, name: &str) -> Option<&ChildRef> {
        self.children.get(name)
    }

    pub fn children(&self) -> &BTreeMap<String, ChildRef> {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn view(&self) -> CollectionView {
        CollectionView {
            children: self
                .children
                .iter()
                .map(|(name, child)| (name.clone(), child.key))
                .collect(),
        }
    }
}

/// A decoded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Chunk(Bytes),
    File(FileNode),
    Collection(CollectionNode),
}

impl Node {
    pub fn empty_collection() -> Self {
        Node::Collection(CollectionNode::default())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Chunk(_) => NodeKind::Chunk,
            Node::File(_) => NodeKind::File,
            Node::Collection(_) => NodeKind::Collection,
        }
    }

    /// Logical size of the content this node represents
    pub fn size(&self) -> u64 {
        match self {
            Node::Chunk(data) => data.len() as u64,
            Node::File(file) => file.size,
            Node::Collection(collection) => collection.size,
        }
    }

    /// Encode and hash in one go.
    pub fn seal(&self) -> (Key, Bytes) {
        let bytes = Bytes::from(self.encode());
        (Key::digest(&bytes), bytes)
    }

    pub fn key(&self) -> Key {
        Key::digest(&self.encode())
    }

    /// Keys of every direct child
    pub fn child_keys(&self) -> Vec<Key> {
        match self {
            Node::Chunk(_) => Vec::new(),
            Node::File(file) => file.children.iter().map(|c| c.key).collect(),
            Node::Collection(collection) => collection.children.values().map(|c| c.key).collect(),
        }
    }

    pub fn info(&self) -> NodeInfo {
        match self {
            Node::Chunk(data) => NodeInfo::chunk(data.len() as u64),
            Node::File(file) => NodeInfo {
                kind: NodeKind::File,
                size: file.size,
                content_type: Some(file.content_type.clone()),
                children: Some(file.children.len() as u32),
            },
            Node::Collection(collection) => NodeInfo {
                kind: NodeKind::Collection,
                size: collection.size,
                content_type: None,
                children: Some(collection.children.len() as u32),
            },
        }
    }
}

/// Summary of a node, as returned by HEAD-style lookups and tree listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub kind: NodeKind,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<u32>,
}

impl NodeInfo {
    pub fn chunk(size: u64) -> Self {
        Self {
            kind: NodeKind::Chunk,
            size,
            content_type: None,
            children: None,
        }
    }
}

/// JSON view of a file node: `{chunks: [key...], contentType, size}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub chunks: Vec<Key>,
    pub content_type: String,
    pub size: u64,
}

/// JSON view of a collection node: `{children: {name: key}}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionView {
    pub children: BTreeMap<String, Key>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_serialize_to_wire_shape() {
        let chunk = Node::Chunk(Bytes::from_static(b"abc"));
        let chunk_key = chunk.key();
        let file = FileNode::new(
            "text/plain".to_string(),
            1,
            vec![ChildRef::new(chunk_key, 3)],
        )
        .unwrap();
        let json = serde_json::to_value(file.view()).unwrap();
        assert_eq!(json["contentType"], "text/plain");
        assert_eq!(json["size"], 3);
        assert_eq!(json["chunks"][0], chunk_key.to_string());

        let mut children = BTreeMap::new();
        children.insert("a.txt".to_string(), ChildRef::new(chunk_key, 3));
        let collection = CollectionNode::new(children).unwrap();
        let json = serde_json::to_value(collection.view()).unwrap();
        assert_eq!(json["children"]["a.txt"], chunk_key.to_string());
    }

    #[test]
    fn test_info_reports_kind_and_size() {
        let chunk = Node::Chunk(Bytes::from_static(b"12345"));
        assert_eq!(chunk.info(), NodeInfo::chunk(5));

        let info = Node::empty_collection().info();
        assert_eq!(info.kind, NodeKind::Collection);
        assert_eq!(info.size, 0);
        assert_eq!(info.children, Some(0));

        let json = serde_json::to_string(&NodeInfo::chunk(1)).unwrap();
        assert_eq!(json, r#"{"kind":"chunk","size":1}"#);
    }

    #[test]
    fn test_kind_byte_mapping() {
        for kind in [NodeKind::Chunk, NodeKind::File, NodeKind::Collection] {
            assert_eq!(NodeKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(NodeKind::from_u8(7), None);
    }
}
