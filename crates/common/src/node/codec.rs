use std::collections::BTreeMap;
use std::sync::OnceLock;

use bytes::{BufMut, Bytes};

use super::{ChildRef, CollectionNode, FileNode, Node, NodeKind};
use crate::hash::{Key, DIGEST_LEN};

/**
 * Wire format
 * ===========
 * Every node is a fixed 32 byte header followed by a kind specific body.
 *
 *   0..4   magic "CASN"
 *   4      format version
 *   5      kind (0 chunk, 1 file, 2 collection)
 *   6..8   depth, u16 LE (file nodes only, 0 otherwise)
 *   8..16  logical size, u64 LE
 *   16..20 child count, u32 LE
 *   20..24 body length, u32 LE
 *   24..32 reserved, zero
 *
 *  chunk body:      the raw payload
 *  file body:       u16 content type length, content type, then
 *                    `count` x (32 byte digest, u64 size)
 *  collection body: `count` x (u16 name length, name, 32 byte digest,
 *                    u64 size), sorted by name bytes
 *
 * The canonical empty collection is therefore just a header, and its key
 *  can be computed without touching storage.
 */
pub const MAGIC: [u8; 4] = *b"CASN";
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 32;
/// Encoded size of one child reference inside a file node
pub const CHILD_REF_SIZE: usize = DIGEST_LEN + 8;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("node is truncated: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported node format version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown node kind {0}")]
    UnknownKind(u8),
    #[error("reserved header bytes are not zero")]
    ReservedBits,
    #[error("declared body length {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("invalid {kind} header field: {field}")]
    InvalidField { kind: NodeKind, field: &'static str },
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("collection names are not strictly sorted at {0:?}")]
    UnsortedChildren(String),
    #[error("empty collection entry name")]
    EmptyName,
    #[error("declared size {declared} does not match children total {computed}")]
    SizeMismatch { declared: u64, computed: u64 },
    #[error("trailing bytes after node body")]
    TrailingBytes,
}

/// Parsed fixed-size node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: NodeKind,
    pub depth: u16,
    pub size: u64,
    pub count: u32,
    pub body_len: u32,
}

impl Header {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind.as_u8());
        buf.put_u16_le(self.depth);
        buf.put_u64_le(self.size);
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.body_len);
        buf.put_slice(&[0u8; 8]);
    }

    /// Parse and sanity check the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_SIZE,
                have: data.len(),
            });
        }
        if data[0..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        if data[4] != VERSION {
            return Err(CodecError::UnsupportedVersion(data[4]));
        }
        let kind = NodeKind::from_u8(data[5]).ok_or(CodecError::UnknownKind(data[5]))?;
        if data[24..32].iter().any(|b| *b != 0) {
            return Err(CodecError::ReservedBits);
        }
        let mut reader = Reader::new(&data[6..24]);
        Ok(Self {
            kind,
            depth: reader.u16()?,
            size: reader.u64()?,
            count: reader.u32()?,
            body_len: reader.u32()?,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let out = &self.data[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(CodecError::Truncated {
                needed: self.pos.saturating_add(n),
                have: self.data.len(),
            }),
        }
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        Ok(u64::from_le_bytes(out))
    }

    fn child_ref(&mut self) -> Result<ChildRef, CodecError> {
        let digest = self.take(DIGEST_LEN)?;
        let key = Key::from_slice(digest).ok_or(CodecError::Truncated {
            needed: DIGEST_LEN,
            have: digest.len(),
        })?;
        let size = self.u64()?;
        Ok(ChildRef { key, size })
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }
}

fn put_child_ref(buf: &mut Vec<u8>, child: &ChildRef) {
    buf.put_slice(child.key.as_bytes());
    buf.put_u64_le(child.size);
}

pub(super) fn sum_sizes<'a>(mut children: impl Iterator<Item = &'a ChildRef>) -> Option<u64> {
    children.try_fold(0u64, |acc, c| acc.checked_add(c.size))
}

impl Node {
    /// Encoded length without building the encoding
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                Node::Chunk(data) => data.len(),
                Node::File(file) => 2 + file.content_type.len() + file.children.len() * CHILD_REF_SIZE,
                Node::Collection(collection) => collection
                    .children
                    .keys()
                    .map(|name| 2 + name.len() + CHILD_REF_SIZE)
                    .sum(),
            }
    }

    /// Canonical encoding. Collections are always written in name order,
    ///  so insertion order never leaks into the key.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.encoded_len();
        let mut buf = Vec::with_capacity(len);
        let body_len = (len - HEADER_SIZE) as u32;
        match self {
            Node::Chunk(data) => {
                Header {
                    kind: NodeKind::Chunk,
                    depth: 0,
                    size: data.len() as u64,
                    count: 0,
                    body_len,
                }
                .write(&mut buf);
                buf.put_slice(data);
            }
            Node::File(file) => {
                Header {
                    kind: NodeKind::File,
                    depth: file.depth,
                    size: file.size,
                    count: file.children.len() as u32,
                    body_len,
                }
                .write(&mut buf);
                buf.put_u16_le(file.content_type.len() as u16);
                buf.put_slice(file.content_type.as_bytes());
                for child in &file.children {
                    put_child_ref(&mut buf, child);
                }
            }
            Node::Collection(collection) => {
                Header {
                    kind: NodeKind::Collection,
                    depth: 0,
                    size: collection.size,
                    count: collection.children.len() as u32,
                    body_len,
                }
                .write(&mut buf);
                for (name, child) in &collection.children {
                    buf.put_u16_le(name.len() as u16);
                    buf.put_slice(name.as_bytes());
                    put_child_ref(&mut buf, child);
                }
            }
        }
        buf
    }

    /// Strict inverse of [`Node::encode`]. Anything that would not have
    ///  been produced by `encode` is rejected.
    pub fn decode(data: &Bytes) -> Result<Self, CodecError> {
        let header = Header::parse(data)?;
        let body = &data[HEADER_SIZE..];
        if header.body_len as usize != body.len() {
            return Err(CodecError::LengthMismatch {
                declared: header.body_len as usize,
                actual: body.len(),
            });
        }

        match header.kind {
            NodeKind::Chunk => {
                if header.depth != 0 {
                    return Err(invalid(NodeKind::Chunk, "depth"));
                }
                if header.count != 0 {
                    return Err(invalid(NodeKind::Chunk, "count"));
                }
                if header.size != body.len() as u64 {
                    return Err(CodecError::SizeMismatch {
                        declared: header.size,
                        computed: body.len() as u64,
                    });
                }
                Ok(Node::Chunk(data.slice(HEADER_SIZE..)))
            }
            NodeKind::File => {
                if header.depth == 0 {
                    return Err(invalid(NodeKind::File, "depth"));
                }
                if header.count == 0 {
                    return Err(invalid(NodeKind::File, "count"));
                }
                let mut reader = Reader::new(body);
                let ct_len = reader.u16()? as usize;
                let content_type = std::str::from_utf8(reader.take(ct_len)?)
                    .map_err(|_| CodecError::InvalidUtf8("content type"))?
                    .to_string();
                // bound the allocation by what the body can actually hold
                let remaining = body.len() - 2 - ct_len;
                if remaining != header.count as usize * CHILD_REF_SIZE {
                    return Err(CodecError::LengthMismatch {
                        declared: header.count as usize * CHILD_REF_SIZE,
                        actual: remaining,
                    });
                }
                let mut children = Vec::with_capacity(header.count as usize);
                for _ in 0..header.count {
                    children.push(reader.child_ref()?);
                }
                let computed = sum_sizes(children.iter()).ok_or(CodecError::SizeMismatch {
                    declared: header.size,
                    computed: u64::MAX,
                })?;
                if computed != header.size {
                    return Err(CodecError::SizeMismatch {
                        declared: header.size,
                        computed,
                    });
                }
                Ok(Node::File(FileNode {
                    content_type,
                    size: header.size,
                    depth: header.depth,
                    children,
                }))
            }
            NodeKind::Collection => {
                if header.depth != 0 {
                    return Err(invalid(NodeKind::Collection, "depth"));
                }
                let mut reader = Reader::new(body);
                let mut children = BTreeMap::new();
                let mut previous: Option<&[u8]> = None;
                for _ in 0..header.count {
                    let name_len = reader.u16()? as usize;
                    let name = reader.take(name_len)?;
                    if name.is_empty() {
                        return Err(CodecError::EmptyName);
                    }
                    let name_str = std::str::from_utf8(name)
                        .map_err(|_| CodecError::InvalidUtf8("collection name"))?;
                    if previous.is_some_and(|p| p >= name) {
                        return Err(CodecError::UnsortedChildren(name_str.to_string()));
                    }
                    previous = Some(name);
                    let child = reader.child_ref()?;
                    children.insert(name_str.to_string(), child);
                }
                if !reader.is_done() {
                    return Err(CodecError::TrailingBytes);
                }
                let computed = sum_sizes(children.values()).ok_or(CodecError::SizeMismatch {
                    declared: header.size,
                    computed: u64::MAX,
                })?;
                if computed != header.size {
                    return Err(CodecError::SizeMismatch {
                        declared: header.size,
                        computed,
                    });
                }
                Ok(Node::Collection(CollectionNode {
                    size: header.size,
                    children,
                }))
            }
        }
    }
}

fn invalid(kind: NodeKind, field: &'static str) -> CodecError {
    CodecError::InvalidField { kind, field }
}

/// Encoding of the canonical empty collection.
pub fn empty_collection_bytes() -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(&MAGIC);
    out[4] = VERSION;
    out[5] = NodeKind::Collection.as_u8();
    out
}

/// Key of the canonical empty collection, derived locally.
pub fn empty_collection_key() -> Key {
    static KEY: OnceLock<Key> = OnceLock::new();
    *KEY.get_or_init(|| Key::digest(&empty_collection_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &'static [u8]) -> Node {
        Node::Chunk(Bytes::from_static(data))
    }

    #[test]
    fn test_empty_collection_is_bare_header() {
        let encoded = Node::empty_collection().encode();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(encoded, empty_collection_bytes().to_vec());
        assert_eq!(Node::empty_collection().key(), empty_collection_key());
    }

    #[test]
    fn test_chunk_encoding() {
        let node = chunk(b"hello");
        let encoded = Bytes::from(node.encode());
        assert_eq!(encoded.len(), HEADER_SIZE + 5);
        assert_eq!(node.encoded_len(), encoded.len());
        assert_eq!(Node::decode(&encoded).unwrap(), node);
    }

    #[test]
    fn test_collection_key_ignores_insertion_order() {
        let a = ChildRef::new(chunk(b"a").key(), 1);
        let b = ChildRef::new(chunk(b"b").key(), 1);

        let mut first = BTreeMap::new();
        first.insert("zeta".to_string(), a);
        first.insert("alpha".to_string(), b);

        let mut second = BTreeMap::new();
        second.insert("alpha".to_string(), b);
        second.insert("zeta".to_string(), a);

        let first = Node::Collection(CollectionNode::new(first).unwrap());
        let second = Node::Collection(CollectionNode::new(second).unwrap());
        assert_eq!(first.key(), second.key());

        let decoded = Node::decode(&Bytes::from(first.encode())).unwrap();
        assert_eq!(decoded, first);
        assert_eq!(decoded.size(), 2);
    }

    #[test]
    fn test_file_encoding() {
        let children = vec![
            ChildRef::new(chunk(b"abc").key(), 3),
            ChildRef::new(chunk(b"de").key(), 2),
        ];
        let node = Node::File(FileNode::new("text/plain".into(), 1, children).unwrap());
        let encoded = Bytes::from(node.encode());
        assert_eq!(
            encoded.len(),
            HEADER_SIZE + 2 + "text/plain".len() + 2 * CHILD_REF_SIZE
        );
        let decoded = Node::decode(&encoded).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.size(), 5);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Node::decode(&Bytes::from_static(b"short")),
            Err(CodecError::Truncated { .. })
        ));

        let mut bad_magic = Node::empty_collection().encode();
        bad_magic[0] = b'X';
        assert_eq!(
            Node::decode(&Bytes::from(bad_magic)),
            Err(CodecError::BadMagic)
        );

        let mut bad_kind = Node::empty_collection().encode();
        bad_kind[5] = 9;
        assert_eq!(
            Node::decode(&Bytes::from(bad_kind)),
            Err(CodecError::UnknownKind(9))
        );

        let mut reserved = Node::empty_collection().encode();
        reserved[31] = 1;
        assert_eq!(
            Node::decode(&Bytes::from(reserved)),
            Err(CodecError::ReservedBits)
        );

        let mut extra = chunk(b"abc").encode();
        extra.push(0);
        assert!(matches!(
            Node::decode(&Bytes::from(extra)),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_lying_sizes() {
        let children = vec![ChildRef::new(chunk(b"abc").key(), 3)];
        let mut encoded = Node::File(FileNode::new("x".into(), 1, children).unwrap()).encode();
        // bump the declared size
        encoded[8] = 4;
        assert!(matches!(
            Node::decode(&Bytes::from(encoded)),
            Err(CodecError::SizeMismatch {
                declared: 4,
                computed: 3
            })
        ));
    }

    #[test]
    fn test_decode_rejects_unsorted_collection() {
        let child = ChildRef::new(chunk(b"a").key(), 1);
        let mut buf = Vec::new();
        Header {
            kind: NodeKind::Collection,
            depth: 0,
            size: 2,
            count: 2,
            body_len: (2 * (2 + 1 + CHILD_REF_SIZE)) as u32,
        }
        .write(&mut buf);
        for name in [b"b", b"a"] {
            buf.put_u16_le(1);
            buf.put_slice(name);
            put_child_ref(&mut buf, &child);
        }
        assert!(matches!(
            Node::decode(&Bytes::from(buf)),
            Err(CodecError::UnsortedChildren(name)) if name == "a"
        ));
    }

    #[test]
    fn test_decode_rejects_file_without_children() {
        let mut buf = Vec::new();
        Header {
            kind: NodeKind::File,
            depth: 1,
            size: 0,
            count: 0,
            body_len: 2,
        }
        .write(&mut buf);
        buf.put_u16_le(0);
        assert_eq!(
            Node::decode(&Bytes::from(buf)),
            Err(CodecError::InvalidField {
                kind: NodeKind::File,
                field: "count"
            })
        );
    }
}
