use std::collections::{BTreeMap, HashSet};

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::Engine;
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::node::{Node, NodeInfo};
use crate::storage::StorageProvider;

/// Resume point of a tree enumeration.
///
/// The cursor names the root it belongs to and the position reached in
///  each level of the depth-first descent. Resuming re-derives the pending
///  keys from the root itself, so a cursor can only ever lead to nodes
///  below that root and the server keeps no state between pages. A node
///  reachable along two paths may show up on more than one page; the pages
///  are merged as a map so this is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeCursor {
    root: Key,
    positions: Vec<usize>,
}

impl TreeCursor {
    fn start(root: Key) -> Self {
        Self {
            root,
            positions: vec![0],
        }
    }

    pub fn root(&self) -> &Key {
        &self.root
    }
}

/// One page of a tree enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePage {
    pub nodes: BTreeMap<Key, NodeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<TreeCursor>,
}

/// Sibling keys at one level of the descent and how many were visited.
struct Frame {
    keys: Vec<Key>,
    pos: usize,
}

impl Frame {
    fn is_done(&self) -> bool {
        self.pos >= self.keys.len()
    }
}

/// Children the descent steps into. Chunks below a leaf-level file are
///  reported from the file's references instead.
fn descend(node: &Node) -> Vec<Key> {
    match node {
        Node::File(file) if !file.is_leaf_level() => file.children().iter().map(|c| c.key).collect(),
        Node::Collection(collection) => collection.children().values().map(|c| c.key).collect(),
        _ => Vec::new(),
    }
}

impl<S: StorageProvider + 'static> Engine<S> {
    /// Enumerate everything reachable from `root`, one page at a time.
    ///
    /// `limit` bounds the number of nodes fetched per page. Chunks under a
    ///  leaf-level file node are described from their parent's references
    ///  and never fetched, so a page may carry more entries than `limit`.
    ///  A cursor issued for another root, or one whose positions do not
    ///  describe a descent of this root, is rejected.
    pub async fn get_tree(
        &self,
        root: &Key,
        cursor: Option<TreeCursor>,
        limit: usize,
    ) -> Result<TreePage> {
        let limit = limit.clamp(1, self.config.tree_page_size.max(1));
        let mut frames = match cursor {
            None => vec![Frame {
                keys: vec![*root],
                pos: 0,
            }],
            Some(cursor) => self.resume(root, cursor).await?,
        };
        let mut nodes = BTreeMap::new();
        let mut fetched = 0;

        while let Some(frame) = frames.last_mut() {
            if frame.is_done() {
                frames.pop();
                continue;
            }
            let key = frame.keys[frame.pos];
            if nodes.contains_key(&key) {
                frame.pos += 1;
                continue;
            }
            if fetched == limit {
                break;
            }
            let node = self.get_node(&key).await?;
            fetched += 1;
            frame.pos += 1;
            nodes.insert(key, node.info());
            if let Node::File(file) = &node {
                if file.is_leaf_level() {
                    for child in file.children() {
                        nodes
                            .entry(child.key)
                            .or_insert_with(|| NodeInfo::chunk(child.size));
                    }
                }
            }
            let children = descend(&node);
            if !children.is_empty() {
                frames.push(Frame {
                    keys: children,
                    pos: 0,
                });
            }
        }

        let next = (!frames.is_empty()).then(|| TreeCursor {
            root: *root,
            positions: frames.iter().map(|f| f.pos).collect(),
        });
        Ok(TreePage { nodes, next })
    }

    /// Rebuild the descent a cursor describes by walking down from `root`.
    async fn resume(&self, root: &Key, cursor: TreeCursor) -> Result<Vec<Frame>> {
        let invalid = || CasError::InvalidInput("tree cursor does not belong to this root".to_string());
        if cursor.root != *root {
            tracing::warn!(root = %root, cursor_root = %cursor.root, "rejecting tree cursor for another root");
            return Err(invalid());
        }
        let Some((&first, rest)) = cursor.positions.split_first() else {
            return Err(invalid());
        };
        if first > 1 {
            return Err(invalid());
        }

        let mut frames = vec![Frame {
            keys: vec![*root],
            pos: first,
        }];
        for &pos in rest {
            let parent = frames.last().ok_or_else(invalid)?;
            // the deeper level was opened by the node just visited
            let expanded = parent.pos.checked_sub(1).and_then(|i| parent.keys.get(i)).ok_or_else(invalid)?;
            let keys = descend(&self.get_node(expanded).await?);
            if keys.is_empty() || pos > keys.len() {
                return Err(invalid());
            }
            frames.push(Frame { keys, pos });
        }
        Ok(frames)
    }

    /// Every node reachable from `root` as a lazy stream, built on
    ///  [`Engine::get_tree`] pages.
    pub fn walk(&self, root: &Key) -> BoxStream<'static, Result<(Key, NodeInfo)>> {
        let engine = self.clone();
        let root = *root;
        let page_size = self.config.tree_page_size;
        let mut seen = HashSet::new();
        stream::try_unfold(Some(TreeCursor::start(root)), move |cursor| {
            let engine = engine.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok::<_, CasError>(None);
                };
                let page = engine.get_tree(&root, Some(cursor), page_size).await?;
                Ok(Some((page.nodes, page.next)))
            }
        })
        .map_ok(|nodes| stream::iter(nodes.into_iter().map(Ok::<_, CasError>)))
        .try_flatten()
        .try_filter(move |(key, _)| futures::future::ready(seen.insert(*key)))
        .boxed()
    }

    /// Whether `key` is `root` or anywhere below it. Stops at the first hit
    ///  and never fetches chunk payloads.
    pub async fn is_reachable(&self, root: &Key, key: &Key) -> Result<bool> {
        if root == key {
            return Ok(true);
        }
        let mut visited = HashSet::new();
        let mut pending = vec![*root];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            match self.get_node(&current).await? {
                Node::File(file) => {
                    if file.children().iter().any(|c| c.key == *key) {
                        return Ok(true);
                    }
                    if !file.is_leaf_level() {
                        pending.extend(file.children().iter().map(|c| c.key));
                    }
                }
                Node::Collection(collection) => {
                    for child in collection.children().values() {
                        if child.key == *key {
                            return Ok(true);
                        }
                        pending.push(child.key);
                    }
                }
                Node::Chunk(_) => {}
            }
        }
        Ok(false)
    }
}
