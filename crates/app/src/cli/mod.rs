pub mod args;
pub mod op;
pub mod ops;

use clap::Subcommand;

pub use args::{Args, Parser};
pub use ops::{Cat, Depot, Gc, Init, Ls, Put, Rm, Ticket, Tree, Version};

crate::command_enum! {
    (Init, Init),
    (Put, Put),
    (Cat, Cat),
    (Ls, Ls),
    (Tree, Tree),
    (Rm, Rm),
    (Depot, Depot),
    (Ticket, Ticket),
    (Gc, Gc),
    (Version, Version),
}
