pub mod cat;
pub mod depot;
pub mod gc;
pub mod init;
pub mod ls;
pub mod put;
pub mod rm;
pub mod ticket;
pub mod tree;
pub mod version;

pub use cat::Cat;
pub use depot::Depot;
pub use gc::Gc;
pub use init::Init;
pub use ls::Ls;
pub use put::Put;
pub use rm::Rm;
pub use ticket::Ticket;
pub use tree::Tree;
pub use version::Version;

use common::error::CasError;

use crate::cli::op::OpenError;

/// Failure of a command that only opens the store and calls into it
#[derive(Debug, thiserror::Error)]
pub enum StoreOpError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Cas(#[from] CasError),
}
