use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::node::Node;
use crate::storage::StorageProvider;

/// Lazily produced pieces of a file's content
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// A subtree still to be read, with the byte range wanted from it
///  (relative to the subtree's own start).
struct Pending {
    key: Key,
    start: u64,
    end: u64,
    // size the parent claims this subtree has; unknown for the root
    expected: Option<u64>,
}

struct ReadState<S> {
    storage: Arc<S>,
    stack: Vec<Pending>,
}

/// Depth-first walk over the subtrees overlapping `[start, end)`.
///
/// Each poll fetches at most one node, so a consumer that stops polling
///  (or drops the stream) stops the walk; the in-flight fetch is dropped
///  with it.
pub(crate) fn stream_range<S>(storage: Arc<S>, root: Key, start: u64, end: u64) -> ByteStream
where
    S: StorageProvider + 'static,
{
    let state = ReadState {
        storage,
        stack: vec![Pending {
            key: root,
            start,
            end,
            expected: None,
        }],
    };

    Box::pin(futures::stream::try_unfold(state, |mut state| async move {
        while let Some(pending) = state.stack.pop() {
            let node = state
                .storage
                .get_node(&pending.key)
                .await
                .map_err(CasError::from)?;
            if let Some(expected) = pending.expected {
                if node.size() != expected {
                    tracing::error!(
                        key = %pending.key,
                        expected,
                        actual = node.size(),
                        "child size disagrees with parent reference"
                    );
                    return Err(CasError::IntegrityViolation {
                        key: pending.key,
                        reason: format!(
                            "parent declares {} bytes, node holds {}",
                            expected,
                            node.size()
                        ),
                    });
                }
            }

            match node {
                Node::Chunk(data) => {
                    let len = data.len() as u64;
                    let start = pending.start.min(len) as usize;
                    let end = pending.end.min(len) as usize;
                    if start < end {
                        return Ok(Some((data.slice(start..end), state)));
                    }
                }
                Node::File(file) => {
                    // offsets come from the inline child sizes, so subtrees
                    //  outside the range are never fetched
                    let mut offset = 0u64;
                    let mut overlapping = Vec::new();
                    for child in file.children() {
                        let child_end = offset + child.size;
                        if child_end > pending.start && offset < pending.end {
                            overlapping.push(Pending {
                                key: child.key,
                                start: pending.start.saturating_sub(offset),
                                end: pending.end.min(child_end) - offset,
                                expected: Some(child.size),
                            });
                        }
                        if offset >= pending.end {
                            break;
                        }
                        offset = child_end;
                    }
                    state.stack.extend(overlapping.into_iter().rev());
                }
                Node::Collection(_) => {
                    return Err(CasError::InvalidInput(format!(
                        "{} is a collection, not a file",
                        pending.key
                    )));
                }
            }
        }
        Ok(None)
    }))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use crate::config::CasConfig;
    use crate::engine::Engine;
    use crate::error::CasError;
    use crate::node::{ChildRef, FileNode, Node};
    use crate::storage::{MemoryStorage, StorageProvider};

    #[tokio::test]
    async fn test_stream_yields_one_piece_per_chunk() {
        let config = CasConfig {
            node_limit: 256,
            max_content_type_bytes: 16,
            ..CasConfig::default()
        };
        let engine = Engine::new(MemoryStorage::new(), config);
        let data = bytes::Bytes::from(vec![7u8; 1000]);
        let root = engine.put_file(data, "").await.unwrap().root;

        let pieces: Vec<_> = engine.stream_file(&root).collect().await;
        // 1000 bytes over 224 byte chunks
        assert_eq!(pieces.len(), 5);
        assert_eq!(
            pieces.iter().map(|p| p.as_ref().unwrap().len()).sum::<usize>(),
            1000
        );
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_fetching() {
        let engine = Engine::new(MemoryStorage::new(), CasConfig::with_node_limit(256));
        let root = engine
            .put_file(bytes::Bytes::from(vec![1u8; 2000]), "")
            .await
            .unwrap()
            .root;
        let mut stream = engine.stream_file(&root);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 224);
        drop(stream);
    }

    #[tokio::test]
    async fn test_detects_lying_parent() {
        let storage = MemoryStorage::new();
        let chunk = Node::Chunk(bytes::Bytes::from_static(b"four"));
        let (chunk_key, chunk_bytes) = chunk.seal();
        storage.put(&chunk_key, chunk_bytes).await.unwrap();

        // parent claims the chunk holds six bytes
        let file = Node::File(FileNode::new(
            String::new(),
            1,
            vec![ChildRef::new(chunk_key, 6)],
        )
        .unwrap());
        let (file_key, file_bytes) = file.seal();
        storage.put(&file_key, file_bytes).await.unwrap();

        let engine = Engine::new(storage, CasConfig::default());
        assert!(matches!(
            engine.read_file(&file_key).await,
            Err(CasError::IntegrityViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_reading_a_collection_fails() {
        let engine = Engine::new(MemoryStorage::new(), CasConfig::default());
        let (key, bytes) = Node::empty_collection().seal();
        engine.storage().put(&key, bytes).await.unwrap();
        assert!(matches!(
            engine.read_file(&key).await,
            Err(CasError::InvalidInput(_))
        ));
    }
}
