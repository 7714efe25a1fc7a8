//! The CAS engine: builds node graphs from bytes and named hierarchies and
//! traverses them again.
//!
//! The engine knows nothing about realms or tickets. It trusts its caller
//! to have authorized the operation and only enforces structural rules
//! (node limit, names, content types) and integrity.

mod build;
mod draft;
mod reader;
mod walk;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::config::CasConfig;
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::node::{
    build_file_tree, split_into_chunks, validate_name, ChildRef, CollectionView, LayoutError, Node,
    NodeInfo, NodeKind,
};
use crate::storage::{StorageError, StorageProvider};

pub use build::{Entry, Resolver};
pub use draft::{Draft, DraftEntry};
pub use reader::ByteStream;
pub use walk::{TreeCursor, TreePage};

/// Chunk writes kept in flight at once while storing a file
const WRITE_CONCURRENCY: usize = 8;

/// One node touched by a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub key: Key,
    pub kind: NodeKind,
    /// Logical size of the node's content
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Whether the bytes were newly written (false when deduplicated)
    pub created: bool,
}

/// Result of a write: the root key plus every node of the written graph,
///  children before parents. Everything listed is durable by the time the
///  receipt is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReceipt {
    pub root: Key,
    pub nodes: Vec<NodeSummary>,
}

impl WriteReceipt {
    fn from_nodes(nodes: Vec<NodeSummary>) -> Result<Self> {
        let root = nodes
            .last()
            .map(|n| n.key)
            .ok_or_else(|| CasError::InvalidInput("write produced no nodes".to_string()))?;
        Ok(Self { root, nodes })
    }

    /// Summary of the root node
    pub fn root_summary(&self) -> Option<&NodeSummary> {
        self.nodes.iter().rev().find(|n| n.key == self.root)
    }

    /// Bytes newly written to storage by this write
    pub fn new_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.created).count()
    }
}

/// Split a `.`-relative path into its segments. `"."`, `""` and `"/"`
///  name the root.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let trimmed = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(path);
    if trimmed.is_empty() || trimmed == "." {
        return Ok(Vec::new());
    }
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(CasError::InvalidInput(format!("invalid path: {}", path)));
    }
    Ok(segments)
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "." || parent.is_empty() {
        format!("./{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

#[derive(Debug)]
pub struct Engine<S> {
    storage: Arc<S>,
    config: CasConfig,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: StorageProvider + 'static> Engine<S> {
    pub fn new(storage: S, config: CasConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Encode, bound-check and persist a single node.
    async fn store(&self, node: &Node) -> Result<NodeSummary> {
        let (key, bytes) = node.seal();
        if bytes.len() > self.config.node_limit {
            return Err(CasError::InvalidInput(format!(
                "encoded {} node is {} bytes, limit is {}",
                node.kind(),
                bytes.len(),
                self.config.node_limit
            )));
        }
        let created = self.storage.put(&key, bytes).await?;
        tracing::debug!(key = %key, kind = %node.kind(), created, "stored node");
        let content_type = match node {
            Node::File(file) => Some(file.content_type().to_string()),
            _ => None,
        };
        Ok(NodeSummary {
            key,
            kind: node.kind(),
            size: node.size(),
            content_type,
            created,
        })
    }

    pub(crate) fn check_content_type(&self, content_type: &str) -> Result<()> {
        if content_type.len() > self.config.max_content_type_bytes {
            return Err(CasError::InvalidInput(format!(
                "content type is {} bytes, limit is {}",
                content_type.len(),
                self.config.max_content_type_bytes
            )));
        }
        Ok(())
    }

    /// Chunk `data`, build its file tree and persist every node bottom-up.
    ///  Nodes that already exist are not rewritten.
    pub async fn put_file(&self, data: Bytes, content_type: &str) -> Result<WriteReceipt> {
        self.check_content_type(content_type)?;
        let capacity = self.config.chunk_capacity();
        if capacity == 0 {
            return Err(CasError::InvalidInput(format!(
                "node limit of {} bytes leaves no room for chunk data",
                self.config.node_limit
            )));
        }
        let total = data.len();
        let chunks = split_into_chunks(&data, capacity);

        // children must be durable before any parent that names them
        let mut nodes: Vec<NodeSummary> = futures::stream::iter(chunks)
            .map(|chunk| async move { self.store(&Node::Chunk(chunk)).await })
            .buffered(WRITE_CONCURRENCY)
            .try_collect()
            .await?;

        let refs: Vec<ChildRef> = nodes.iter().map(|n| ChildRef::new(n.key, n.size)).collect();
        let tree = build_file_tree(&refs, self.config.node_limit, content_type)?;
        for node in tree.nodes() {
            nodes.push(self.store(node).await?);
        }

        let receipt = WriteReceipt::from_nodes(nodes)?;
        tracing::debug!(
            root = %receipt.root,
            size = total,
            nodes = receipt.nodes.len(),
            new = receipt.new_nodes(),
            "stored file"
        );
        Ok(receipt)
    }

    /// Store one already-encoded node as received over the wire. The bytes
    ///  must decode, fit the node limit and only reference stored children.
    pub async fn put_node(&self, bytes: Bytes) -> Result<NodeSummary> {
        let key = Key::digest(&bytes);
        if bytes.len() > self.config.node_limit {
            return Err(CasError::InvalidInput(format!(
                "node is {} bytes, limit is {}",
                bytes.len(),
                self.config.node_limit
            )));
        }
        let node = Node::decode(&bytes).map_err(|source| {
            tracing::warn!(key = %key, error = %source, "rejecting undecodable node");
            CasError::CorruptNode { key, source }
        })?;
        if let Node::File(file) = &node {
            self.check_content_type(file.content_type())?;
        }
        self.verify_children(&key, &node).await?;
        self.store(&node).await
    }

    /// Every child of a transported node must already be stored with the
    ///  size its parent declares. File levels nest by depth and collection
    ///  entries obey the same naming rules as locally built collections.
    async fn verify_children(&self, key: &Key, node: &Node) -> Result<()> {
        let (children, expected): (Vec<ChildRef>, Option<(NodeKind, u16)>) = match node {
            Node::Chunk(_) => return Ok(()),
            Node::File(file) if file.is_leaf_level() => {
                (file.children().to_vec(), Some((NodeKind::Chunk, 0)))
            }
            Node::File(file) => (
                file.children().to_vec(),
                Some((NodeKind::File, file.depth() - 1)),
            ),
            Node::Collection(collection) => {
                if collection.len() > self.config.max_children {
                    return Err(LayoutError::TooManyChildren {
                        count: collection.len(),
                        max: self.config.max_children,
                    }
                    .into());
                }
                for name in collection.children().keys() {
                    validate_name(name, &self.config)?;
                }
                (collection.children().values().copied().collect(), None)
            }
        };

        futures::stream::iter(children.into_iter().map(Ok::<_, CasError>))
            .try_for_each_concurrent(WRITE_CONCURRENCY, |child| async move {
                let stored = match self.storage.get_node(&child.key).await {
                    Ok(stored) => stored,
                    Err(StorageError::NotFound(_)) => {
                        return Err(CasError::NotFound(format!(
                            "child {} of node {}",
                            child.key, key
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };
                if stored.size() != child.size {
                    tracing::warn!(key = %key, child = %child.key, declared = child.size, actual = stored.size(), "rejecting node with a wrong child size");
                    return Err(CasError::InvalidInput(format!(
                        "node {} declares {} bytes for child {}, which holds {}",
                        key,
                        child.size,
                        child.key,
                        stored.size()
                    )));
                }
                match (expected, &stored) {
                    (None, _) => Ok(()),
                    (Some((NodeKind::Chunk, _)), Node::Chunk(_)) => Ok(()),
                    (Some((NodeKind::File, depth)), Node::File(file)) if file.depth() == depth => {
                        Ok(())
                    }
                    _ => Err(CasError::InvalidInput(format!(
                        "child {} of file node {} is a {} node at the wrong level",
                        child.key,
                        key,
                        stored.kind()
                    ))),
                }
            })
            .await
    }

    pub async fn get_node(&self, key: &Key) -> Result<Node> {
        Ok(self.storage.get_node(key).await?)
    }

    /// Raw encoded bytes of a node
    pub async fn get_bytes(&self, key: &Key) -> Result<Bytes> {
        Ok(self.storage.get(key).await?)
    }

    pub async fn has(&self, key: &Key) -> Result<bool> {
        Ok(self.storage.has(key).await?)
    }

    pub async fn stat(&self, key: &Key) -> Result<NodeInfo> {
        Ok(self.get_node(key).await?.info())
    }

    /// Children of a collection node
    pub async fn list(&self, key: &Key) -> Result<CollectionView> {
        match self.get_node(key).await? {
            Node::Collection(collection) => Ok(collection.view()),
            _ => Err(CasError::NotADirectory(key.to_string())),
        }
    }

    /// Follow `path` from `root`, one node fetch per segment.
    pub async fn resolve_path(&self, root: &Key, path: &str) -> Result<Key> {
        let mut current = *root;
        let mut walked = String::from(".");
        for segment in split_path(path)? {
            let node = match self.storage.get_node(&current).await {
                Ok(node) => node,
                Err(StorageError::NotFound(_)) if current != *root => {
                    // a parent names a child that storage does not hold
                    return Err(CasError::IntegrityViolation {
                        key: current,
                        reason: format!("referenced at {} but not stored", walked),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            let Node::Collection(collection) = node else {
                return Err(CasError::NotADirectory(walked));
            };
            let child = collection
                .get(segment)
                .ok_or_else(|| CasError::ChildNotFound {
                    parent: walked.clone(),
                    name: segment.to_string(),
                })?;
            current = child.key;
            walked = join_path(&walked, segment);
        }
        Ok(current)
    }

    /// Whole logical content of a file (or a bare chunk).
    pub async fn read_file(&self, key: &Key) -> Result<Bytes> {
        let mut stream = self.stream_file(key);
        let mut out = BytesMut::new();
        while let Some(piece) = stream.next().await {
            out.extend_from_slice(&piece?);
        }
        Ok(out.freeze())
    }

    /// Lazily stream a file's content, one chunk at a time.
    pub fn stream_file(&self, key: &Key) -> ByteStream {
        reader::stream_range(self.storage.clone(), *key, 0, u64::MAX)
    }

    /// Stream the bytes in `[start, end)`. `end` is clamped to the file
    ///  size; only subtrees overlapping the range are fetched.
    pub fn slice(&self, key: &Key, start: u64, end: u64) -> Result<ByteStream> {
        if start > end {
            return Err(CasError::InvalidInput(format!(
                "range start {} is past end {}",
                start, end
            )));
        }
        Ok(reader::stream_range(self.storage.clone(), *key, start, end))
    }

    /// Collect [`Engine::slice`] into one buffer.
    pub async fn read_range(&self, key: &Key, start: u64, end: u64) -> Result<Bytes> {
        let mut stream = self.slice(key, start, end)?;
        let mut out = BytesMut::new();
        while let Some(piece) = stream.next().await {
            out.extend_from_slice(&piece?);
        }
        Ok(out.freeze())
    }

    /// Start an in-memory edit of a new, empty collection.
    pub fn draft(&self) -> Draft<S> {
        Draft::new(self.clone())
    }

    /// Start an in-memory edit seeded from an existing collection.
    pub async fn draft_from(&self, root: &Key) -> Result<Draft<S>> {
        Draft::from_root(self.clone(), root).await
    }
}
