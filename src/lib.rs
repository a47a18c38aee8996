//! gzecho: a single-connection TCP echo server.
//!
//! Every message passes through a presentation layer on the way in and
//! out. The default presenter encodes text and gzip-compresses it.
//!
//! Features:
//! - One peer at a time; others wait in a backlog of one
//! - Configurable stop word that ends a session with "Bye, bye!"
//! - Messages larger than one read are reassembled up to a limit
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod connection;
pub mod error;
pub mod presentation;
pub mod server;

pub use config::{Config, ConfigError, ServerConfig};
pub use error::ServerError;
pub use presentation::{PresentationError, Presenter};
pub use server::{Server, ServerState, ShutdownHandle};
