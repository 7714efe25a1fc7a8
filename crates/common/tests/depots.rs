//! Integration tests for depots, including the full write-then-publish flow

mod common;

use bytes::Bytes;

use ::common::error::CasError;
use ::common::node::{empty_collection_key, Node};

#[tokio::test]
async fn test_update_twice_then_rollback() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");
    let mut roots = Vec::new();
    for seed in [b"v0", b"v1", b"v2"] {
        let receipt = env
            .cas
            .write_file(&admin, Bytes::from_static(seed), "text/plain")
            .await
            .unwrap();
        roots.push(receipt.root);
    }

    let depot = env
        .cas
        .create_depot(&admin, "site", Some(roots[0]), Some("initial".into()))
        .await
        .unwrap();
    env.cas
        .update_depot(&admin, &depot.id, &roots[1], None)
        .await
        .unwrap();
    env.cas
        .update_depot(&admin, &depot.id, &roots[2], None)
        .await
        .unwrap();

    let outcome = env.cas.rollback_depot(&admin, &depot.id, 1).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.depot.version, 3);
    assert_eq!(outcome.depot.root, roots[1]);
    assert_eq!(outcome.depot.message.as_deref(), Some("rollback to version 1"));

    let history = env
        .cas
        .depot_history(&admin, &depot.id, 100, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    let version_one = history.iter().find(|e| e.version == 1).unwrap();
    assert_eq!(version_one.root, roots[1]);
    assert_eq!(history.last().unwrap().message.as_deref(), Some("initial"));
}

#[tokio::test]
async fn test_depot_rules() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");

    let main = env.cas.ensure_main(&admin).await.unwrap();
    assert!(matches!(
        env.cas.create_depot(&admin, "main", None, None).await,
        Err(CasError::Conflict(_))
    ));
    assert!(matches!(
        env.cas.delete_depot(&admin, &main.id).await,
        Err(CasError::Forbidden(_))
    ));

    // roots from another realm are not visible here
    let foreign = env
        .cas
        .write_file(&env.admin("elsewhere"), Bytes::from_static(b"x"), "text/plain")
        .await
        .unwrap()
        .root;
    assert!(matches!(
        env.cas.update_depot(&admin, &main.id, &foreign, None).await,
        Err(CasError::NotFound(_))
    ));

    let scratch = env.cas.create_depot(&admin, "scratch", None, None).await.unwrap();
    assert_eq!(scratch.root, empty_collection_key());
    env.cas.delete_depot(&admin, &scratch.id).await.unwrap();
    assert!(matches!(
        env.cas.get_depot(&admin, &scratch.id).await,
        Err(CasError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_end_to_end_publish() {
    let env = common::setup_test_env(1024 * 1024);
    let admin = env.admin("r");

    // the empty collection key needs no round trip
    let empty = empty_collection_key();
    let main = env.cas.ensure_main(&admin).await.unwrap();
    assert_eq!(main.root, empty);

    let data = common::pattern(5 * 1024 * 1024);
    let file = env
        .cas
        .write_file(&admin, data.clone(), "application/octet-stream")
        .await
        .unwrap();
    match env.cas.engine().get_node(&file.root).await.unwrap() {
        Node::File(node) => assert_eq!(node.children().len(), 6),
        other => panic!("expected a file node, got {:?}", other.kind()),
    }

    let mut draft = env.cas.engine().draft_from(&main.root).await.unwrap();
    draft.link("./doc.bin", file.root).await.unwrap();
    let collection = env.cas.write_collection(&admin, &draft).await.unwrap();

    let updated = env
        .cas
        .update_depot(&admin, &main.id, &collection.root, Some("add doc".into()))
        .await
        .unwrap();
    assert_eq!(updated.version, 1);

    let history = env
        .cas
        .depot_history(&admin, &main.id, 10, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].root, empty);

    let doc = env
        .cas
        .resolve(&admin, &updated.root, "./doc.bin")
        .await
        .unwrap();
    assert_eq!(doc, file.root);
    assert_eq!(env.cas.read_file(&admin, &doc).await.unwrap(), data);
}
