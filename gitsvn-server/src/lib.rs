//! gitsvn server
//!
//! The svnserve-protocol front end: session engine, command registry, delta
//! reporter, commit editor and the TCP acceptor. Repositories, revision
//! views and locks come from `gitsvn-core`; the token codec and svndiff
//! encoding from `gitsvn-protocol`.

pub mod commands;
pub mod config;
pub mod depth;
pub mod editor;
pub mod reporter;
pub mod server;
pub mod session;
pub mod step;

pub use config::{Config, RepoConfig};
pub use server::SvnServer;
pub use session::{serve_connection, Session, SharedContext};
