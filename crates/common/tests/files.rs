//! Integration tests for writing, reading and resolving content

mod common;

use bytes::Bytes;
use futures::TryStreamExt;

use ::common::error::CasError;
use ::common::node::{Node, HEADER_SIZE};

#[tokio::test]
async fn test_same_bytes_same_key_one_copy() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");
    let data = common::pattern(5_000);

    let first = env.cas.write_file(&admin, data.clone(), "application/octet-stream").await.unwrap();
    let stored = env.storage.len();
    let second = env.cas.write_file(&admin, data, "application/octet-stream").await.unwrap();

    assert_eq!(first.root, second.root);
    assert_eq!(env.storage.len(), stored);
    assert_eq!(second.new_nodes(), 0);
}

#[tokio::test]
async fn test_round_trip_around_chunk_capacity() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");
    let capacity = 1024 - HEADER_SIZE;

    for len in [0, 1, capacity - 1, capacity, capacity + 1, 3 * capacity + 17] {
        let data = common::pattern(len);
        let receipt = env.cas.write_file(&admin, data.clone(), "text/plain").await.unwrap();
        let back = env.cas.read_file(&admin, &receipt.root).await.unwrap();
        assert_eq!(back, data, "length {}", len);

        let info = env.cas.stat(&admin, &receipt.root).await.unwrap();
        assert_eq!(info.size, len as u64);
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
    }
}

#[tokio::test]
async fn test_every_node_fits_the_limit() {
    let limit = 512;
    let env = common::setup_test_env(limit);
    let admin = env.admin("r");
    let capacity = limit - HEADER_SIZE;
    // more chunks than two levels of references can hold
    let data = common::pattern(capacity * 122 + 5);

    let receipt = env
        .cas
        .write_file(&admin, data.clone(), "application/octet-stream")
        .await
        .unwrap();

    for (key, len) in env.storage.entries() {
        assert!(len <= limit, "{} is {} bytes", key, len);
    }
    match env.cas.engine().get_node(&receipt.root).await.unwrap() {
        Node::File(file) => assert!(file.depth() >= 3, "depth {}", file.depth()),
        other => panic!("expected a file node, got {:?}", other.kind()),
    }
    assert_eq!(env.cas.read_file(&admin, &receipt.root).await.unwrap(), data);

    // a slice crossing several chunk and subtree boundaries
    let start = capacity as u64 * 10 + 3;
    let end = capacity as u64 * 40 + 11;
    let pieces: Vec<Bytes> = env
        .cas
        .slice(&admin, &receipt.root, start, end)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let sliced: Vec<u8> = pieces.iter().flat_map(|b| b.iter().copied()).collect();
    assert_eq!(sliced, data[start as usize..end as usize]);
}

#[tokio::test]
async fn test_path_resolution() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");

    let mut draft = env.cas.engine().draft();
    draft
        .insert("./a/b/c.txt", Bytes::from_static(b"deep"), "text/plain")
        .await
        .unwrap();
    draft
        .insert("./top.txt", Bytes::from_static(b"top"), "text/plain")
        .await
        .unwrap();
    let root = env.cas.write_collection(&admin, &draft).await.unwrap().root;

    assert_eq!(env.cas.resolve(&admin, &root, ".").await.unwrap(), root);

    let leaf = env.cas.resolve(&admin, &root, "./a/b/c.txt").await.unwrap();
    assert_eq!(
        env.cas.read_file(&admin, &leaf).await.unwrap(),
        Bytes::from_static(b"deep")
    );

    assert!(matches!(
        env.cas.resolve(&admin, &root, "./top.txt/below").await,
        Err(CasError::NotADirectory(_))
    ));
    assert!(matches!(
        env.cas.resolve(&admin, &root, "./a/missing").await,
        Err(CasError::ChildNotFound { name, .. }) if name == "missing"
    ));

    let listing = env.cas.list(&admin, &root).await.unwrap();
    let names: Vec<&str> = listing.children.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a", "top.txt"]);
}

#[tokio::test]
async fn test_tree_pages_cover_the_graph() {
    let env = common::setup_test_env(512);
    let admin = env.admin("r");

    let mut draft = env.cas.engine().draft();
    for i in 0..5 {
        draft
            .insert(&format!("./dir{}/file", i), common::pattern(2_000 + i), "text/plain")
            .await
            .unwrap();
    }
    let receipt = env.cas.write_collection(&admin, &draft).await.unwrap();

    let mut seen = std::collections::BTreeMap::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = env.cas.tree(&admin, &receipt.root, cursor, 3).await.unwrap();
        pages += 1;
        seen.extend(page.nodes);
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert!(pages > 1);
    for node in &receipt.nodes {
        assert!(seen.contains_key(&node.key), "missing {}", node.key);
    }
}
