use std::collections::BTreeMap;

use bytes::Bytes;

use super::codec::{CHILD_REF_SIZE, HEADER_SIZE};
use super::{ChildRef, CollectionNode, FileNode, Node};
use crate::config::CasConfig;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("duplicate entry name: {0}")]
    DuplicateName(String),
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
    #[error("entry name is {len} bytes, limit is {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("collection has {count} children, limit is {max}")]
    TooManyChildren { count: usize, max: usize },
    #[error("encoded node is {size} bytes, limit is {limit}")]
    NodeTooLarge { size: usize, limit: usize },
    #[error("content type of {len} bytes does not fit in a node of {limit} bytes")]
    ContentTypeTooLong { len: usize, limit: usize },
    #[error("a file needs at least one chunk")]
    NoChunks,
    #[error("total size of the children does not fit in 64 bits")]
    SizeOverflow,
}

/// Split `data` into pieces of at most `capacity` bytes. The pieces share
///  the input buffer. Empty input yields a single empty chunk so that every
///  file has at least one child.
pub fn split_into_chunks(data: &Bytes, capacity: usize) -> Vec<Bytes> {
    if data.is_empty() || capacity == 0 {
        return vec![Bytes::new()];
    }
    let mut chunks = Vec::with_capacity(data.len().div_ceil(capacity));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + capacity).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    chunks
}

/// A file tree ready to be persisted: the root file node and every
///  intermediate file node, listed bottom-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTree {
    pub root: Node,
    pub interior: Vec<Node>,
}

impl FileTree {
    /// Every file node of the tree, children before parents.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.interior.iter().chain(std::iter::once(&self.root))
    }
}

/// Number of child references that fit in a file node carrying a content
///  type of `content_type_len` bytes.
fn fan_out(limit: usize, content_type_len: usize) -> usize {
    limit.saturating_sub(HEADER_SIZE + 2 + content_type_len) / CHILD_REF_SIZE
}

/// Build a bounded fan-out tree of file nodes over `chunks`.
///
/// When the chunk references do not fit in one root node they are grouped
///  greedily, left to right, under intermediate file nodes with an empty
///  content type. This repeats one level at a time until the remaining
///  references fit next to the root's content type, so every node in the
///  tree stays within `limit`.
pub fn build_file_tree(
    chunks: &[ChildRef],
    limit: usize,
    content_type: &str,
) -> Result<FileTree, LayoutError> {
    if chunks.is_empty() {
        return Err(LayoutError::NoChunks);
    }
    let root_fan_out = fan_out(limit, content_type.len());
    if content_type.len() > u16::MAX as usize || root_fan_out == 0 {
        return Err(LayoutError::ContentTypeTooLong {
            len: content_type.len(),
            limit,
        });
    }
    let inner_fan_out = fan_out(limit, 0);
    if inner_fan_out < 2 {
        return Err(LayoutError::NodeTooLarge {
            size: HEADER_SIZE + 2 + 2 * CHILD_REF_SIZE,
            limit,
        });
    }

    let mut level = chunks.to_vec();
    let mut depth: u16 = 1;
    let mut interior = Vec::new();
    while level.len() > root_fan_out {
        let mut next = Vec::with_capacity(level.len().div_ceil(inner_fan_out));
        for group in level.chunks(inner_fan_out) {
            let node = Node::File(FileNode::new(String::new(), depth, group.to_vec())?);
            next.push(ChildRef::new(node.key(), node.size()));
            interior.push(node);
        }
        level = next;
        depth += 1;
    }

    let root = Node::File(FileNode::new(content_type.to_string(), depth, level)?);
    Ok(FileTree { root, interior })
}

/// Check a single collection entry name.
pub(crate) fn validate_name(name: &str, config: &CasConfig) -> Result<(), LayoutError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(LayoutError::InvalidName(name.to_string()));
    }
    if name.len() > config.max_name_bytes {
        return Err(LayoutError::NameTooLong {
            len: name.len(),
            max: config.max_name_bytes,
        });
    }
    Ok(())
}

/// Assemble a collection from named child references.
///
/// Input order is irrelevant: entries are kept in a name-ordered map and
///  encoded in that order.
pub fn build_collection<I>(entries: I, config: &CasConfig) -> Result<Node, LayoutError>
where
    I: IntoIterator<Item = (String, ChildRef)>,
{
    let mut children = BTreeMap::new();
    for (name, child) in entries {
        validate_name(&name, config)?;
        if children.contains_key(&name) {
            return Err(LayoutError::DuplicateName(name));
        }
        children.insert(name, child);
        if children.len() > config.max_children {
            return Err(LayoutError::TooManyChildren {
                count: children.len(),
                max: config.max_children,
            });
        }
    }

    let node = Node::Collection(CollectionNode::new(children)?);
    let size = node.encoded_len();
    if size > config.node_limit {
        return Err(LayoutError::NodeTooLarge {
            size,
            limit: config.node_limit,
        });
    }
    Ok(node)
}
