//! meshlink CLI library
//!
//! Command-line parsing, the node configuration file, key handling and the
//! node runner behind the `meshlink` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod node;

pub use cli::{Cli, Commands};
pub use config::NodeConfig;
pub use error::{CliError, Result};
pub use node::Node;
