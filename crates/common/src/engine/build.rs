use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{join_path, Engine, NodeSummary, WriteReceipt};
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::node::{build_collection, validate_name, ChildRef, Node};
use crate::storage::StorageProvider;

/// What lives at a path of a collection being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// New file content
    File { data: Bytes, content_type: String },
    /// An already stored node, linked without copying
    Link(Key),
    /// A directory with these child names
    Dir(Vec<String>),
}

/// Supplies the shape of a collection tree, one path at a time. Paths are
///  `.` for the root and `./a/b` below it.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Entry>;
}

impl<S: StorageProvider + 'static> Engine<S> {
    /// Build and persist a collection tree bottom-up from `resolver`. The
    ///  root path must resolve to a directory.
    pub async fn put_collection(&self, resolver: &dyn Resolver) -> Result<WriteReceipt> {
        let mut nodes = Vec::new();
        match resolver.resolve(".").await? {
            Entry::Dir(names) => {
                self.build_dir(resolver, ".".to_string(), names, &mut nodes)
                    .await?;
            }
            _ => {
                return Err(CasError::InvalidInput(
                    "collection root must be a directory".to_string(),
                ))
            }
        }
        let receipt = WriteReceipt::from_nodes(nodes)?;
        tracing::debug!(
            root = %receipt.root,
            nodes = receipt.nodes.len(),
            new = receipt.new_nodes(),
            "stored collection"
        );
        Ok(receipt)
    }

    fn build_dir<'a>(
        &'a self,
        resolver: &'a dyn Resolver,
        path: String,
        names: Vec<String>,
        nodes: &'a mut Vec<NodeSummary>,
    ) -> BoxFuture<'a, Result<ChildRef>> {
        async move {
            if names.len() > self.config.max_children {
                return Err(CasError::InvalidInput(format!(
                    "{} has {} children, limit is {}",
                    path,
                    names.len(),
                    self.config.max_children
                )));
            }
            let mut children = Vec::with_capacity(names.len());
            for name in names {
                // reject bad names before asking the resolver about them
                validate_name(&name, &self.config)?;
                let child_path = join_path(&path, &name);
                let child = match resolver.resolve(&child_path).await? {
                    Entry::File { data, content_type } => {
                        let receipt = self.put_file(data, &content_type).await?;
                        let size = receipt
                            .root_summary()
                            .map(|n| n.size)
                            .unwrap_or_default();
                        let root = receipt.root;
                        nodes.extend(receipt.nodes);
                        ChildRef::new(root, size)
                    }
                    Entry::Link(key) => {
                        let node = self.get_node(&key).await?;
                        nodes.push(NodeSummary {
                            key,
                            kind: node.kind(),
                            size: node.size(),
                            content_type: match &node {
                                Node::File(file) => Some(file.content_type().to_string()),
                                _ => None,
                            },
                            created: false,
                        });
                        ChildRef::new(key, node.size())
                    }
                    Entry::Dir(grandchildren) => {
                        self.build_dir(resolver, child_path, grandchildren, nodes)
                            .await?
                    }
                };
                children.push((name, child));
            }
            let collection = build_collection(children, &self.config)?;
            let summary = self.store(&collection).await?;
            let child = ChildRef::new(summary.key, summary.size);
            nodes.push(summary);
            Ok(child)
        }
        .boxed()
    }
}
