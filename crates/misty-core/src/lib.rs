//! misty-core: shared configuration, identity loading, and hostname hashing.
//! All other misty crates depend on this one.

pub mod config;
pub mod identity;

pub use config::{ConfigError, IdentityPaths, MistyConfig, ProbeConfig};
pub use identity::{hashed_name, Identity, IdentityConfig};
