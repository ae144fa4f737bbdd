//! CLI commands implementation

pub mod index;
pub mod init;
pub mod library;
pub mod query;
pub mod status;

pub use index::*;
pub use init::*;
pub use library::*;
pub use query::*;
pub use status::*;
