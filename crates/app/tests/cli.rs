use std::path::Path;

use casket::cli::op::{Op, OpContext, DEFAULT_REALM};
use casket::cli::ops::depot::{self, history::History, rollback::Rollback};
use casket::cli::ops::ticket::{issue::Issue, revoke::Revoke, show::Show};
use casket::cli::ops::{Cat, Gc, Init, Ls, Put, Rm, Tree};
use casket::state::StateError;

use common::hash::Key;

fn context(dir: &Path) -> OpContext {
    OpContext::new(Some(dir.join("casket")), DEFAULT_REALM.to_string())
}

async fn init(ctx: &OpContext, node_limit: usize) {
    Init {
        node_limit: Some(node_limit),
        log_level: "warn".to_string(),
        log_dir: None,
    }
    .execute(ctx)
    .await
    .unwrap();
}

fn put(file: &Path) -> Put {
    Put {
        file: file.to_path_buf(),
        content_type: "application/octet-stream".to_string(),
        depot: None,
        link_as: None,
        message: None,
    }
}

fn first_key(output: &str) -> Key {
    output.lines().next().unwrap().parse().unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_commands_require_init() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());

    let err = Ls {
        key: None,
        path: None,
        limit: 10,
        after: None,
    }
    .execute(&ctx)
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        casket::cli::ops::StoreOpError::Open(casket::cli::op::OpenError::State(
            StateError::NotInitialized
        ))
    ));
}

#[tokio::test]
async fn test_put_then_cat() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());
    init(&ctx, 4096).await;

    let source = temp.path().join("notes.txt");
    std::fs::write(&source, "hello casket").unwrap();
    let output = put(&source).execute(&ctx).await.unwrap();
    let key = first_key(&output);

    let text = Cat {
        key,
        path: None,
        range: None,
        out: None,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert_eq!(text, "hello casket");

    let slice = Cat {
        key,
        path: None,
        range: Some(6..100),
        out: None,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert_eq!(slice, "casket");

    // the store reopens from disk on every command
    let owned = Ls {
        key: None,
        path: None,
        limit: 10,
        after: None,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(owned.contains(&key.to_string()));
}

#[tokio::test]
async fn test_chunked_file_to_disk() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());
    init(&ctx, 4096).await;

    let data = pattern(20_000);
    let source = temp.path().join("big.bin");
    std::fs::write(&source, &data).unwrap();
    let key = first_key(&put(&source).execute(&ctx).await.unwrap());

    let out = temp.path().join("copy.bin");
    Cat {
        key,
        path: None,
        range: None,
        out: Some(out.clone()),
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);

    let tree = Tree {
        key,
        page_size: Some(2),
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(tree.lines().count() > 2);
    assert!(tree.contains(&key.to_string()));
}

#[tokio::test]
async fn test_put_into_depot_and_roll_back() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());
    init(&ctx, 4096).await;

    let source = temp.path().join("page.html");
    std::fs::write(&source, "<p>v1</p>").unwrap();
    let first = Put {
        depot: Some("main".to_string()),
        message: Some("first page".to_string()),
        content_type: "text/html".to_string(),
        ..put(&source)
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(first.contains("version 1"));

    std::fs::write(&source, "<p>v2</p>").unwrap();
    let second = Put {
        depot: Some("main".to_string()),
        content_type: "text/html".to_string(),
        ..put(&source)
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(second.contains("version 2"));

    let history = History {
        depot: "main".to_string(),
        limit: 10,
        before: None,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(history.contains("v1\t"));
    assert!(history.contains("first page"));

    let rolled = Rollback {
        depot: "main".to_string(),
        version: 1,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(rolled.contains("rollback to version 1"));

    let session = ctx.open().await.unwrap();
    let main = depot::lookup(session.cas(), &session.caller, "main")
        .await
        .unwrap();
    assert_eq!(main.version, 3);

    let page = Cat {
        key: main.root,
        path: Some("./page.html".to_string()),
        range: None,
        out: None,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert_eq!(page, "<p>v1</p>");
}

#[tokio::test]
async fn test_ticket_issue_show_revoke() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());
    init(&ctx, 4096).await;

    let source = temp.path().join("shared.txt");
    std::fs::write(&source, "shared").unwrap();
    let key = first_key(&put(&source).execute(&ctx).await.unwrap());

    let issued = Issue {
        keys: vec![key],
        write: false,
        quota: Some(1024),
        accepted_types: vec!["text/plain".to_string()],
        ttl: Some(600),
        base_url: Some("https://cas.example.com/".parse().unwrap()),
    }
    .execute(&ctx)
    .await
    .unwrap();
    let id = issued.lines().next().unwrap().to_string();
    assert!(issued.contains(&format!("https://cas.example.com/local/ticket/{}", id)));

    let shown = Show { id: id.clone() }.execute(&ctx).await.unwrap();
    let info: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(info["realm"], "local");

    Revoke { id: id.clone() }.execute(&ctx).await.unwrap();
    assert!(Show { id }.execute(&ctx).await.is_err());
}

#[tokio::test]
async fn test_rm_then_gc_reclaims() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());
    init(&ctx, 4096).await;

    let source = temp.path().join("scratch.bin");
    std::fs::write(&source, pattern(10_000)).unwrap();
    let key = first_key(&put(&source).execute(&ctx).await.unwrap());

    Rm { key }.execute(&ctx).await.unwrap();

    let dry = Gc {
        delete: false,
        batch: 100,
        verbose: true,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(dry.contains(&key.to_string()));
    assert!(dry.contains("deleted 0"));

    Gc {
        delete: true,
        batch: 100,
        verbose: false,
    }
    .execute(&ctx)
    .await
    .unwrap();

    let again = Gc {
        delete: false,
        batch: 100,
        verbose: false,
    }
    .execute(&ctx)
    .await
    .unwrap();
    assert!(again.contains("collectable 0"));
}

#[tokio::test]
async fn test_ticket_bearer_reads_only_its_scope() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context(temp.path());
    init(&ctx, 4096).await;

    let shared = temp.path().join("shared.txt");
    std::fs::write(&shared, "for the ticket").unwrap();
    let shared_key = first_key(&put(&shared).execute(&ctx).await.unwrap());
    let private = temp.path().join("private.txt");
    std::fs::write(&private, "owner only").unwrap();
    let private_key = first_key(&put(&private).execute(&ctx).await.unwrap());

    let issued = Issue {
        keys: vec![shared_key],
        write: false,
        quota: None,
        accepted_types: vec![],
        ttl: Some(600),
        base_url: None,
    }
    .execute(&ctx)
    .await
    .unwrap();
    let id = issued.lines().next().unwrap().to_string();

    let bearer = context(temp.path()).with_ticket(Some(id));
    let cat = |key| Cat {
        key,
        path: None,
        range: None,
        out: None,
    };
    assert_eq!(cat(shared_key).execute(&bearer).await.unwrap(), "for the ticket");
    assert!(cat(private_key).execute(&bearer).await.is_err());

    // a blank ticket never falls back to the owner identity
    let blank = context(temp.path()).with_ticket(Some("  ".to_string()));
    assert!(matches!(
        cat(shared_key).execute(&blank).await,
        Err(casket::cli::ops::cat::CatError::Open(casket::cli::op::OpenError::Auth(_)))
    ));
}
