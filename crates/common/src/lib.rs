/**
 * Inbound identity and the validator chain
 *  that resolves credentials into one.
 */
pub mod auth;
/**
 * Access-controlled facade over the engine,
 *  ledger, ticket authority and depots.
 */
pub mod cas;
pub mod clock;
pub mod config;
/**
 * Named, versioned pointers into the
 *  node graph, with append-only history.
 */
pub mod depot;
/**
 * Builds node graphs from bytes and named
 *  hierarchies, and reads them back.
 */
pub mod engine;
pub mod error;
/**
 * Mark and sweep over stored bytes, keyed
 *  off the ownership reverse index.
 */
pub mod gc;
/**
 * Content keys and the hash provider
 *  they are derived with.
 */
pub mod hash;
/**
 * Which realm can see which node.
 */
pub mod ledger;
/**
 * In-memory record store, used in tests
 *  and for ephemeral nodes.
 */
pub mod memory;
/**
 * Node types, the binary node codec and
 *  the chunk tree layout.
 */
pub mod node;
/**
 * Where node bytes live: memory, object
 *  storage, and a retry layer.
 */
pub mod storage;
/**
 * Scoped, expiring, single-write capability
 *  tickets and the authority that issues them.
 */
pub mod ticket;

pub mod prelude {
    pub use crate::auth::{Caller, Credentials, Dispatcher, Identity, Validator, Verdict};
    pub use crate::cas::{Cas, RecordStore};
    pub use crate::clock::{Clock, SharedClock, SystemClock};
    pub use crate::config::{CasConfig, RetryConfig};
    pub use crate::depot::{Depot, HistoryEntry, MAIN_DEPOT};
    pub use crate::engine::{Engine, Entry, Resolver, WriteReceipt};
    pub use crate::error::{CasError, ErrorKind};
    pub use crate::hash::{HashProvider, Key, Sha256Hasher};
    pub use crate::memory::MemoryRecords;
    pub use crate::node::{empty_collection_key, Node, NodeInfo};
    pub use crate::storage::{MemoryStorage, ObjectStorage, StorageProvider};
    pub use crate::ticket::{Scope, Ticket, TicketRequest, WriteGrant};
}
