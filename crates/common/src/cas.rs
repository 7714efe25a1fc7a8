//! The access-controlled entry point: every operation resolves the caller to
//! a realm and a grant, checks ownership, and only then touches the engine.
//!
//! Writes follow one order: bytes become durable, the ticket (if any) is
//! consumed, and ownership is recorded children first. A failure before the
//! last step leaves no ownership record for the attempted root.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::auth::{Caller, Identity};
use crate::clock::SharedClock;
use crate::config::CasConfig;
use crate::depot::{Depot, DepotProvider, Depots, HistoryEntry, RollbackOutcome, MAIN_DEPOT};
use crate::engine::{
    ByteStream, Engine, Entry, NodeSummary, Resolver, TreeCursor, TreePage, WriteReceipt,
};
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::ledger::{Ledger, LedgerProvider, OwnershipPage};
use crate::node::{empty_collection_bytes, CollectionView, Node, NodeInfo};
use crate::storage::StorageProvider;
use crate::ticket::{
    check_write_policy, scope_covers, Authority, Issuer, Ticket, TicketInfo, TicketProvider,
    TicketRequest, WriteGrant,
};

/// Everything the facade keeps outside the byte store. One backend usually
///  implements all three providers.
pub trait RecordStore: LedgerProvider + TicketProvider + DepotProvider + Clone + 'static {}

impl<T> RecordStore for T where T: LedgerProvider + TicketProvider + DepotProvider + Clone + 'static {}

/// Attribution and limits of one write in progress
#[derive(Debug)]
struct WriteGate {
    realm: String,
    creator: String,
    /// Consumed once the write is durable
    ticket: Option<String>,
    policy: WriteGrant,
}

/// Applies a write gate to every entry a caller's resolver yields.
struct GatedResolver<'a, L> {
    inner: &'a dyn Resolver,
    gate: &'a WriteGate,
    ledger: &'a Ledger<L>,
    written: AtomicU64,
}

#[async_trait]
impl<'a, L: LedgerProvider> Resolver for GatedResolver<'a, L> {
    async fn resolve(&self, path: &str) -> Result<Entry> {
        let entry = self.inner.resolve(path).await?;
        match &entry {
            Entry::File { data, content_type } => {
                let len = data.len() as u64;
                let total = self.written.fetch_add(len, Ordering::SeqCst) + len;
                check_write_policy(&self.gate.policy, content_type, total)?;
            }
            Entry::Link(key) => {
                if !self.ledger.has(&self.gate.realm, key).await? {
                    return Err(CasError::not_found(format!(
                        "linked node {} at {} in realm {}",
                        key, path, self.gate.realm
                    )));
                }
            }
            Entry::Dir(_) => {}
        }
        Ok(entry)
    }
}

/// Multi-tenant content-addressed store.
#[derive(Debug)]
pub struct Cas<S, R> {
    engine: Engine<S>,
    ledger: Ledger<R>,
    authority: Authority<R>,
    depots: Depots<R, R>,
}

impl<S, R: Clone> Clone for Cas<S, R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ledger: self.ledger.clone(),
            authority: self.authority.clone(),
            depots: self.depots.clone(),
        }
    }
}

impl<S, R> Cas<S, R>
where
    S: StorageProvider + 'static,
    R: RecordStore,
{
    pub fn new(storage: S, records: R, config: CasConfig, clock: SharedClock) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CasError::InvalidInput(e.to_string()))?;
        let ledger = Ledger::new(records.clone(), clock.clone());
        Ok(Self {
            engine: Engine::new(storage, config.clone()),
            authority: Authority::new(records.clone(), clock.clone(), config),
            depots: Depots::new(records, ledger.clone(), clock),
            ledger,
        })
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    pub fn ledger(&self) -> &Ledger<R> {
        &self.ledger
    }

    pub fn authority(&self) -> &Authority<R> {
        &self.authority
    }

    pub fn depots(&self) -> &Depots<R, R> {
        &self.depots
    }

    // -- gates --

    async fn open_write(&self, caller: &Caller) -> Result<WriteGate> {
        match caller {
            Caller::Identity(identity) => {
                if !identity.can_write {
                    return Err(CasError::forbidden(format!(
                        "token {} may not write",
                        identity.token_id
                    )));
                }
                let policy = match self.engine.config().unscoped_write_quota {
                    Some(quota) if identity.is_unscoped() => WriteGrant::Bounded {
                        quota: Some(quota),
                        accepted_types: None,
                    },
                    _ => WriteGrant::Unbounded,
                };
                Ok(WriteGate {
                    realm: identity.realm.clone(),
                    creator: identity.token_id.clone(),
                    ticket: None,
                    policy,
                })
            }
            Caller::Ticket(id) => {
                let ticket = self.authority.writable(id).await?;
                Ok(WriteGate {
                    realm: ticket.realm,
                    creator: ticket.id.clone(),
                    ticket: Some(ticket.id),
                    policy: ticket.write,
                })
            }
        }
    }

    /// Count `bytes` against the gate's ticket, if any. Ticket quotas bound
    ///  everything written under the ticket, across calls.
    async fn charge(&self, gate: &WriteGate, bytes: u64) -> Result<()> {
        if let Some(ticket) = &gate.ticket {
            self.authority.charge_write(ticket, bytes).await?;
        }
        Ok(())
    }

    async fn finish_write(&self, gate: &WriteGate, receipt: WriteReceipt) -> Result<WriteReceipt> {
        if let Some(ticket) = &gate.ticket {
            self.authority.commit_write(ticket, &receipt.root).await?;
        }
        self.ledger
            .add_receipt(&gate.realm, &gate.creator, &receipt)
            .await?;
        tracing::debug!(
            realm = %gate.realm,
            root = %receipt.root,
            creator = %gate.creator,
            "write committed"
        );
        Ok(receipt)
    }

    /// Resolve the realm a read of `key` happens in, or fail.
    async fn authorize_read(&self, caller: &Caller, key: &Key) -> Result<String> {
        let (realm, matched) = match caller {
            Caller::Identity(identity) => {
                if !identity.can_read {
                    return Err(CasError::forbidden(format!(
                        "token {} may not read",
                        identity.token_id
                    )));
                }
                let matched = scope_covers(&self.engine, &identity.scope(), key)
                    .await?
                    .ok_or_else(|| {
                        CasError::forbidden(format!("{} is outside the token's keys", key))
                    })?;
                (identity.realm.clone(), matched)
            }
            Caller::Ticket(id) => {
                let (ticket, matched) = self.authority.authorize_read(&self.engine, id, key).await?;
                (ticket.realm, matched)
            }
        };
        let anchor = matched.anchor(key);
        if !self.ledger.has(&realm, &anchor).await? {
            return Err(CasError::not_found(format!("{} in realm {}", key, realm)));
        }
        Ok(realm)
    }

    /// Identities only: tickets never manage realm state.
    fn manager<'c>(&self, caller: &'c Caller, write: bool) -> Result<&'c Identity> {
        match caller {
            Caller::Identity(identity) => {
                if write && !identity.can_write {
                    return Err(CasError::forbidden(format!(
                        "token {} may not write",
                        identity.token_id
                    )));
                }
                if !write && !identity.can_read {
                    return Err(CasError::forbidden(format!(
                        "token {} may not read",
                        identity.token_id
                    )));
                }
                Ok(identity)
            }
            Caller::Ticket(_) => Err(CasError::forbidden(
                "tickets cannot manage realm records",
            )),
        }
    }

    // -- writes --

    pub async fn write_file(
        &self,
        caller: &Caller,
        data: Bytes,
        content_type: &str,
    ) -> Result<WriteReceipt> {
        let gate = self.open_write(caller).await?;
        check_write_policy(&gate.policy, content_type, data.len() as u64)?;
        self.charge(&gate, data.len() as u64).await?;
        let receipt = self.engine.put_file(data, content_type).await?;
        self.finish_write(&gate, receipt).await
    }

    /// Build a collection from `resolver`. Linked nodes must already be
    ///  visible to the writer's realm; quota applies to the sum of new file
    ///  bytes.
    pub async fn write_collection(
        &self,
        caller: &Caller,
        resolver: &dyn Resolver,
    ) -> Result<WriteReceipt> {
        let gate = self.open_write(caller).await?;
        let gated = GatedResolver {
            inner: resolver,
            gate: &gate,
            ledger: &self.ledger,
            written: AtomicU64::new(0),
        };
        let receipt = self.engine.put_collection(&gated).await?;
        self.charge(&gate, gated.written.load(Ordering::SeqCst)).await?;
        self.finish_write(&gate, receipt).await
    }

    /// Store one encoded node received over the wire. Every child must
    ///  already be visible to the realm. A ticket is charged the encoded
    ///  size of every node but not consumed; call [`Cas::commit`] with the
    ///  finished root.
    pub async fn put_node(&self, caller: &Caller, bytes: Bytes) -> Result<NodeSummary> {
        let gate = self.open_write(caller).await?;
        let key = Key::digest(&bytes);
        let node = Node::decode(&bytes).map_err(|source| {
            tracing::warn!(key = %key, error = %source, "rejecting undecodable node");
            CasError::CorruptNode { key, source }
        })?;
        let content_type = match &node {
            Node::File(file) if !file.content_type().is_empty() => file.content_type(),
            _ => "application/octet-stream",
        };
        // accepted types describe files; structural nodes only count
        //  against the quota
        let policy = match (&node, &gate.policy) {
            (Node::File(file), _) if !file.content_type().is_empty() => gate.policy.clone(),
            (_, WriteGrant::Bounded { quota, .. }) => WriteGrant::Bounded {
                quota: *quota,
                accepted_types: None,
            },
            (_, other) => other.clone(),
        };
        check_write_policy(&policy, content_type, bytes.len() as u64)?;

        let check = self.ledger.check(&gate.realm, &node.child_keys()).await?;
        if let Some(missing) = check.missing.first() {
            return Err(CasError::not_found(format!(
                "child {} of {} in realm {}",
                missing, key, gate.realm
            )));
        }

        self.charge(&gate, bytes.len() as u64).await?;
        let summary = self.engine.put_node(bytes).await?;
        self.ledger
            .add(
                &gate.realm,
                &summary.key,
                &gate.creator,
                summary.content_type.as_deref(),
                summary.size,
            )
            .await?;
        Ok(summary)
    }

    /// Finish a node-by-node upload: consume the caller's ticket for `root`.
    pub async fn commit(&self, caller: &Caller, root: &Key) -> Result<()> {
        let gate = self.open_write(caller).await?;
        if !self.ledger.has(&gate.realm, root).await? {
            return Err(CasError::not_found(format!("{} in realm {}", root, gate.realm)));
        }
        if let Some(ticket) = &gate.ticket {
            self.authority.commit_write(ticket, root).await?;
        }
        Ok(())
    }

    /// Drop the caller's realm's visibility of `key`. The bytes stay until a
    ///  sweep finds nothing referencing them.
    pub async fn delete(&self, caller: &Caller, key: &Key) -> Result<()> {
        let identity = self.manager(caller, true)?;
        if !self.ledger.remove(&identity.realm, key).await? {
            return Err(CasError::not_found(format!("{} in realm {}", key, identity.realm)));
        }
        tracing::info!(realm = %identity.realm, key = %key, "removed from realm");
        Ok(())
    }

    // -- reads --

    pub async fn read_file(&self, caller: &Caller, key: &Key) -> Result<Bytes> {
        self.authorize_read(caller, key).await?;
        self.engine.read_file(key).await
    }

    pub async fn stream_file(&self, caller: &Caller, key: &Key) -> Result<ByteStream> {
        self.authorize_read(caller, key).await?;
        Ok(self.engine.stream_file(key))
    }

    pub async fn slice(&self, caller: &Caller, key: &Key, start: u64, end: u64) -> Result<ByteStream> {
        self.authorize_read(caller, key).await?;
        self.engine.slice(key, start, end)
    }

    pub async fn read_range(&self, caller: &Caller, key: &Key, start: u64, end: u64) -> Result<Bytes> {
        self.authorize_read(caller, key).await?;
        self.engine.read_range(key, start, end).await
    }

    /// Encoded bytes of a node, for transport
    pub async fn get_node_bytes(&self, caller: &Caller, key: &Key) -> Result<Bytes> {
        self.authorize_read(caller, key).await?;
        self.engine.get_bytes(key).await
    }

    pub async fn stat(&self, caller: &Caller, key: &Key) -> Result<NodeInfo> {
        self.authorize_read(caller, key).await?;
        self.engine.stat(key).await
    }

    pub async fn list(&self, caller: &Caller, key: &Key) -> Result<CollectionView> {
        self.authorize_read(caller, key).await?;
        self.engine.list(key).await
    }

    /// Follow `path` from `root`. Authorizing the root covers everything
    ///  found below it.
    pub async fn resolve(&self, caller: &Caller, root: &Key, path: &str) -> Result<Key> {
        self.authorize_read(caller, root).await?;
        self.engine.resolve_path(root, path).await
    }

    pub async fn tree(
        &self,
        caller: &Caller,
        root: &Key,
        cursor: Option<TreeCursor>,
        limit: usize,
    ) -> Result<TreePage> {
        self.authorize_read(caller, root).await?;
        self.engine.get_tree(root, cursor, limit).await
    }

    pub async fn list_owned(
        &self,
        caller: &Caller,
        limit: usize,
        cursor: Option<Key>,
    ) -> Result<OwnershipPage> {
        let identity = self.manager(caller, false)?;
        self.ledger.list(&identity.realm, limit, cursor).await
    }

    // -- tickets --

    pub async fn issue_ticket(&self, caller: &Caller, request: TicketRequest) -> Result<Ticket> {
        let (realm, issuer) = match caller {
            Caller::Identity(identity) => (identity.realm.clone(), Issuer::Identity(identity)),
            Caller::Ticket(id) => (
                self.authority.live(id).await?.realm,
                Issuer::Ticket(id.as_str()),
            ),
        };
        if let Some(scope) = &request.scope {
            for key in scope.roots() {
                if !self.ledger.has(&realm, key).await? {
                    return Err(CasError::forbidden(format!(
                        "cannot grant {} which realm {} does not own",
                        key, realm
                    )));
                }
            }
        }
        self.authority.issue(&self.engine, issuer, request).await
    }

    /// Bearer lookup: the id alone is the credential.
    pub async fn resolve_ticket(&self, id: &str) -> Result<TicketInfo> {
        self.authority.resolve(id).await
    }

    /// Identities may revoke any ticket of their realm; a ticket may revoke
    ///  itself and the tickets it issued.
    pub async fn revoke_ticket(&self, caller: &Caller, id: &str) -> Result<()> {
        let target = self.authority.get(id).await?;
        let allowed = match caller {
            Caller::Identity(identity) => {
                identity.can_issue_ticket && identity.realm == target.realm
            }
            Caller::Ticket(holder) => *holder == target.id || *holder == target.issuer,
        };
        if !allowed {
            return Err(CasError::forbidden(format!("may not revoke ticket {}", id)));
        }
        self.authority.revoke(id).await
    }

    pub async fn list_tickets(&self, caller: &Caller) -> Result<Vec<Ticket>> {
        let identity = self.manager(caller, false)?;
        self.authority.list(&identity.realm).await
    }

    // -- depots --

    /// Store the empty collection and make it visible to `realm`.
    async fn own_empty_collection(&self, identity: &Identity) -> Result<Key> {
        let bytes = Bytes::copy_from_slice(&empty_collection_bytes());
        let summary = self.engine.put_node(bytes).await?;
        self.ledger
            .add(&identity.realm, &summary.key, &identity.token_id, None, 0)
            .await?;
        Ok(summary.key)
    }

    /// Create a depot at `root`, or at the empty collection when none is
    ///  given.
    pub async fn create_depot(
        &self,
        caller: &Caller,
        name: &str,
        root: Option<Key>,
        message: Option<String>,
    ) -> Result<Depot> {
        let identity = self.manager(caller, true)?;
        let root = match root {
            Some(root) => root,
            None => self.own_empty_collection(identity).await?,
        };
        self.depots.create(&identity.realm, name, &root, message).await
    }

    pub async fn ensure_main(&self, caller: &Caller) -> Result<Depot> {
        let identity = self.manager(caller, true)?;
        if let Ok(depot) = self.depots.get_by_name(&identity.realm, MAIN_DEPOT).await {
            return Ok(depot);
        }
        let empty = self.own_empty_collection(identity).await?;
        self.depots.ensure_main(&identity.realm, &empty).await
    }

    pub async fn update_depot(
        &self,
        caller: &Caller,
        id: &str,
        root: &Key,
        message: Option<String>,
    ) -> Result<Depot> {
        let identity = self.manager(caller, true)?;
        self.depots
            .update_root(&identity.realm, id, root, message)
            .await
    }

    pub async fn rollback_depot(&self, caller: &Caller, id: &str, version: u64) -> Result<RollbackOutcome> {
        let identity = self.manager(caller, true)?;
        self.depots.rollback(&identity.realm, id, version).await
    }

    pub async fn delete_depot(&self, caller: &Caller, id: &str) -> Result<()> {
        let identity = self.manager(caller, true)?;
        self.depots.delete(&identity.realm, id).await
    }

    pub async fn get_depot(&self, caller: &Caller, id: &str) -> Result<Depot> {
        let identity = self.manager(caller, false)?;
        self.depots.get(&identity.realm, id).await
    }

    pub async fn get_depot_by_name(&self, caller: &Caller, name: &str) -> Result<Depot> {
        let identity = self.manager(caller, false)?;
        self.depots.get_by_name(&identity.realm, name).await
    }

    pub async fn list_depots(&self, caller: &Caller) -> Result<Vec<Depot>> {
        let identity = self.manager(caller, false)?;
        self.depots.list(&identity.realm).await
    }

    pub async fn depot_history(
        &self,
        caller: &Caller,
        id: &str,
        limit: usize,
        cursor: Option<u64>,
    ) -> Result<Vec<HistoryEntry>> {
        let identity = self.manager(caller, false)?;
        self.depots.history(&identity.realm, id, limit, cursor).await
    }
}
