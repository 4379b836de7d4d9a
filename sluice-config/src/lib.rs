//! Configuration for sluice clients.
//!
//! [`ClientOptions`] carries every setting the client, its response cache and
//! its transport read at build time. Options come either from
//! [`ClientOptionsBuilder`] or from a YAML section through [`Configurable`].
pub mod config;
pub mod options;

pub use config::{ConfigError, Configurable};
pub use options::{
    ClientOptions, ClientOptionsBuilder, DEFAULT_USER_AGENT, RetryBackoff,
};
