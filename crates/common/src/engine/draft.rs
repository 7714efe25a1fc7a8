use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use super::{split_path, Engine, Entry, Resolver, WriteReceipt};
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::node::{validate_name, Node};
use crate::storage::StorageProvider;

/// One entry of a working tree.
///
/// Stored subtrees stay as `Existing` until an edit needs to look inside
///  them, at which point a collection is expanded into a `Dir` of
///  `Existing` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftEntry {
    Pending { data: Bytes, content_type: String },
    Existing(Key),
    Dir(BTreeMap<String, DraftEntry>),
}

/// An in-memory, editable collection tree that is persisted in one go by
///  [`Draft::commit`].
#[derive(Debug)]
pub struct Draft<S> {
    engine: Engine<S>,
    root: BTreeMap<String, DraftEntry>,
}

impl<S: StorageProvider + 'static> Draft<S> {
    pub(crate) fn new(engine: Engine<S>) -> Self {
        Self {
            engine,
            root: BTreeMap::new(),
        }
    }

    pub(crate) async fn from_root(engine: Engine<S>, root: &Key) -> Result<Self> {
        let root = expand(&engine, root, ".").await?;
        Ok(Self { engine, root })
    }

    /// Add or replace a file with new content. Missing parent directories
    ///  are created.
    pub async fn insert(&mut self, path: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.engine.check_content_type(content_type)?;
        self.put_entry(
            path,
            DraftEntry::Pending {
                data,
                content_type: content_type.to_string(),
            },
        )
        .await
    }

    /// Hard link an already stored node at `path`.
    pub async fn link(&mut self, path: &str, key: Key) -> Result<()> {
        if !self.engine.has(&key).await? {
            return Err(CasError::not_found(key));
        }
        self.put_entry(path, DraftEntry::Existing(key)).await
    }

    /// Create an empty directory (and any missing parents). Existing
    ///  directories are left alone.
    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        let engine = self.engine.clone();
        let (parent, name) = self.parent_of(path).await?;
        match parent.get(&name) {
            Some(DraftEntry::Dir(_)) => Ok(()),
            Some(DraftEntry::Existing(key)) => {
                // only fine if it is already a collection
                match engine.get_node(key).await? {
                    Node::Collection(_) => Ok(()),
                    _ => Err(CasError::Conflict(format!("{} exists and is a file", path))),
                }
            }
            Some(DraftEntry::Pending { .. }) => {
                Err(CasError::Conflict(format!("{} exists and is a file", path)))
            }
            None => {
                parent.insert(name, DraftEntry::Dir(BTreeMap::new()));
                Ok(())
            }
        }
    }

    /// Remove whatever lives at `path`.
    pub async fn remove(&mut self, path: &str) -> Result<DraftEntry> {
        let (parent, name) = self.parent_of(path).await?;
        parent.remove(&name).ok_or_else(|| CasError::ChildNotFound {
            parent: path.to_string(),
            name,
        })
    }

    /// Whether anything lives at `path`, without expanding stored subtrees
    pub fn contains(&self, path: &str) -> bool {
        let Ok(segments) = split_path(path) else {
            return false;
        };
        let mut dir = &self.root;
        for (i, segment) in segments.iter().enumerate() {
            match dir.get(*segment) {
                Some(DraftEntry::Dir(children)) => dir = children,
                Some(_) => return i + 1 == segments.len(),
                None => return false,
            }
        }
        true
    }

    /// Persist the tree and return its receipt.
    pub async fn commit(&self) -> Result<WriteReceipt> {
        self.engine.put_collection(self).await
    }

    async fn put_entry(&mut self, path: &str, entry: DraftEntry) -> Result<()> {
        let (parent, name) = self.parent_of(path).await?;
        parent.insert(name, entry);
        Ok(())
    }

    /// Walk to the directory holding the last segment of `path`, creating
    ///  and expanding directories on the way.
    async fn parent_of(&mut self, path: &str) -> Result<(&mut BTreeMap<String, DraftEntry>, String)> {
        let mut segments: Vec<String> = split_path(path)?.into_iter().map(String::from).collect();
        let name = segments
            .pop()
            .ok_or_else(|| CasError::InvalidInput("cannot edit the root itself".to_string()))?;
        validate_name(&name, self.engine.config())?;

        let engine = &self.engine;
        let mut dir = &mut self.root;
        let mut walked = String::from(".");
        for segment in segments {
            walked = format!("{}/{}", walked, segment);
            let entry = dir
                .entry(segment)
                .or_insert_with(|| DraftEntry::Dir(BTreeMap::new()));
            if let DraftEntry::Existing(key) = entry {
                let key = *key;
                *entry = DraftEntry::Dir(expand(engine, &key, &walked).await?);
            }
            dir = match entry {
                DraftEntry::Dir(children) => children,
                _ => return Err(CasError::NotADirectory(walked)),
            };
        }
        Ok((dir, name))
    }

    fn lookup(&self, path: &str) -> Result<Entry> {
        let segments = split_path(path)?;
        let mut dir = &self.root;
        let mut found: Option<&DraftEntry> = None;
        for segment in segments {
            if let Some(DraftEntry::Dir(children)) = found {
                dir = children;
            } else if found.is_some() {
                return Err(CasError::NotADirectory(path.to_string()));
            }
            found = Some(dir.get(segment).ok_or_else(|| CasError::ChildNotFound {
                parent: path.to_string(),
                name: segment.to_string(),
            })?);
        }
        Ok(match found {
            None => Entry::Dir(self.root.keys().cloned().collect()),
            Some(DraftEntry::Dir(children)) => Entry::Dir(children.keys().cloned().collect()),
            Some(DraftEntry::Existing(key)) => Entry::Link(*key),
            Some(DraftEntry::Pending { data, content_type }) => Entry::File {
                data: data.clone(),
                content_type: content_type.clone(),
            },
        })
    }
}

async fn expand<S: StorageProvider + 'static>(
    engine: &Engine<S>,
    key: &Key,
    path: &str,
) -> Result<BTreeMap<String, DraftEntry>> {
    match engine.get_node(key).await? {
        Node::Collection(collection) => Ok(collection
            .children()
            .iter()
            .map(|(name, child)| (name.clone(), DraftEntry::Existing(child.key)))
            .collect()),
        _ => Err(CasError::NotADirectory(path.to_string())),
    }
}

#[async_trait]
impl<S: StorageProvider + 'static> Resolver for Draft<S> {
    async fn resolve(&self, path: &str) -> Result<Entry> {
        self.lookup(path)
    }
}
