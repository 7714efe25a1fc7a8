//! Integration tests for capability tickets

mod common;

use std::time::Duration;

use bytes::Bytes;
use url::Url;

use ::common::auth::{Caller, Identity};
use ::common::error::{CasError, ErrorKind};
use ::common::ticket::{Scope, TicketRequest, WriteGrant};

fn write_once() -> TicketRequest {
    TicketRequest {
        scope: None,
        write: WriteGrant::Unbounded,
        ttl: Some(Duration::from_secs(600)),
    }
}

#[tokio::test]
async fn test_second_commit_is_already_consumed() {
    let env = common::setup_test_env(1024);
    let ticket = env
        .cas
        .issue_ticket(&env.admin("r"), write_once())
        .await
        .unwrap();
    let bearer = Caller::ticket(ticket.id.clone());

    let first = env
        .cas
        .write_file(&bearer, Bytes::from_static(b"one"), "text/plain")
        .await
        .unwrap();

    // a second write of the very same content still needs a fresh ticket
    let err = env
        .cas
        .write_file(&bearer, Bytes::from_static(b"one"), "text/plain")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyConsumed);

    let err = env
        .cas
        .authority()
        .commit_write(&ticket.id, &first.root)
        .await
        .unwrap_err();
    assert!(matches!(err, CasError::AlreadyConsumed(_)));
}

#[tokio::test]
async fn test_expired_ticket_fails_every_check() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");
    let root = env
        .cas
        .write_file(&admin, Bytes::from_static(b"data"), "text/plain")
        .await
        .unwrap()
        .root;
    let ticket = env
        .cas
        .issue_ticket(
            &admin,
            TicketRequest {
                scope: Some(Scope::keys([root])),
                write: WriteGrant::Unbounded,
                ttl: Some(Duration::from_secs(5)),
            },
        )
        .await
        .unwrap();
    let bearer = Caller::ticket(ticket.id.clone());
    env.cas.read_file(&bearer, &root).await.unwrap();

    env.clock.advance(chrono::Duration::seconds(5));

    let authority = env.cas.authority();
    assert!(matches!(
        authority.authorize_read(env.cas.engine(), &ticket.id, &root).await,
        Err(CasError::Expired(_))
    ));
    assert!(matches!(
        authority.authorize_write(&ticket.id, "text/plain", 1).await,
        Err(CasError::Expired(_))
    ));
    assert!(matches!(
        env.cas.read_file(&bearer, &root).await,
        Err(CasError::Expired(_))
    ));
    assert!(matches!(
        env.cas.write_file(&bearer, Bytes::from_static(b"x"), "text/plain").await,
        Err(CasError::Expired(_))
    ));
    assert!(matches!(
        env.cas.resolve_ticket(&ticket.id).await,
        Err(CasError::Expired(_))
    ));
}

#[tokio::test]
async fn test_write_policy_is_surfaced_verbatim() {
    let env = common::setup_test_env(1024);
    let ticket = env
        .cas
        .issue_ticket(
            &env.admin("r"),
            TicketRequest {
                write: WriteGrant::Bounded {
                    quota: Some(1_000),
                    accepted_types: Some(["image/png".to_string()].into()),
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bearer = Caller::ticket(ticket.id);

    let err = env
        .cas
        .write_file(&bearer, common::pattern(1_001), "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, CasError::QuotaExceeded { size: 1_001, quota: 1_000 }));

    let err = env
        .cas
        .write_file(&bearer, common::pattern(10), "image/gif")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnacceptedType);

    // failed attempts do not use up the ticket
    env.cas
        .write_file(&bearer, common::pattern(1_000), "image/png")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_collection_quota_counts_all_files() {
    let env = common::setup_test_env(1024);
    let ticket = env
        .cas
        .issue_ticket(
            &env.admin("r"),
            TicketRequest {
                write: WriteGrant::Bounded {
                    quota: Some(100),
                    accepted_types: None,
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bearer = Caller::ticket(ticket.id);

    let mut draft = env.cas.engine().draft();
    draft.insert("./a", common::pattern(60), "x/a").await.unwrap();
    draft.insert("./b", common::pattern(60), "x/b").await.unwrap();
    assert!(matches!(
        env.cas.write_collection(&bearer, &draft).await,
        Err(CasError::QuotaExceeded { size: 120, quota: 100 })
    ));
}

#[tokio::test]
async fn test_delegation_cannot_escalate() {
    let env = common::setup_test_env(1024);
    let admin = env.admin("r");
    let root = env
        .cas
        .write_file(&admin, Bytes::from_static(b"scoped"), "text/plain")
        .await
        .unwrap()
        .root;
    let other = env
        .cas
        .write_file(&admin, Bytes::from_static(b"other"), "text/plain")
        .await
        .unwrap()
        .root;

    let parent = env
        .cas
        .issue_ticket(
            &admin,
            TicketRequest {
                scope: Some(Scope::keys([root])),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bearer = Caller::ticket(parent.id.clone());

    for request in [
        TicketRequest {
            scope: Some(Scope::keys([other])),
            ..Default::default()
        },
        TicketRequest {
            scope: Some(Scope::All),
            ..Default::default()
        },
        TicketRequest {
            write: WriteGrant::Unbounded,
            ..Default::default()
        },
    ] {
        let err = env.cas.issue_ticket(&bearer, request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    let child = env
        .cas
        .issue_ticket(&bearer, TicketRequest::default())
        .await
        .unwrap();
    env.cas
        .read_file(&Caller::ticket(child.id.clone()), &root)
        .await
        .unwrap();

    // a ticket may revoke what it issued
    env.cas.revoke_ticket(&bearer, &child.id).await.unwrap();
    assert!(matches!(
        env.cas.read_file(&Caller::ticket(child.id), &root).await,
        Err(CasError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_descriptor_and_bearer_resolution() {
    let env = common::setup_test_env(2048);
    let admin = env.admin("acme");
    let ticket = env
        .cas
        .issue_ticket(&admin, TicketRequest::default())
        .await
        .unwrap();

    let base = Url::parse("https://cas.example.com").unwrap();
    let url = ticket.descriptor(&base).unwrap();
    assert_eq!(
        url.as_str(),
        format!("https://cas.example.com/acme/ticket/{}", ticket.id)
    );

    let info = env.cas.resolve_ticket(&ticket.id).await.unwrap();
    assert_eq!(info.scope, Scope::All);
    assert_eq!(info.config.node_limit, 2048);

    let reader: Caller = Identity::reader("acme", "viewer").into();
    assert_eq!(env.cas.list_tickets(&reader).await.unwrap().len(), 1);
    assert!(matches!(
        env.cas.revoke_ticket(&reader, &ticket.id).await,
        Err(CasError::Forbidden(_))
    ));
    env.cas.revoke_ticket(&admin, &ticket.id).await.unwrap();
}

#[tokio::test]
async fn test_node_uploads_and_files_share_the_quota() {
    let env = common::setup_test_env(1024);
    let ticket = env
        .cas
        .issue_ticket(
            &env.admin("r"),
            TicketRequest {
                write: WriteGrant::Bounded {
                    quota: Some(500),
                    accepted_types: None,
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bearer = Caller::ticket(ticket.id.clone());

    // many small nodes, each well under the quota
    let mut stored = 0;
    let mut refused = None;
    for i in 0..20u8 {
        let (_, bytes) = ::common::node::Node::Chunk(Bytes::from(vec![i; 40])).seal();
        match env.cas.put_node(&bearer, bytes.clone()).await {
            Ok(_) => stored += bytes.len() as u64,
            Err(err) => {
                refused = Some(err);
                break;
            }
        }
    }
    assert!(stored <= 500);
    assert!(matches!(
        refused,
        Some(CasError::QuotaExceeded { quota: 500, .. })
    ));

    // whole-file writes draw on what the nodes left over
    let err = env
        .cas
        .write_file(&bearer, common::pattern(100), "text/plain")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(
        env.cas.authority().get(&ticket.id).await.unwrap().bytes_written,
        stored
    );
}
