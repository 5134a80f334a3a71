//! CLI command implementations.

mod info;
mod init;
mod show;
mod tree;

pub use info::info;
pub use init::init;
pub use show::show;
pub use tree::tree;
