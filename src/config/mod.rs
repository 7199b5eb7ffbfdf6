//! Configuration module for sdprovision
//!
//! Loads config from `--config`, then `$XDG_CONFIG_HOME/sdprovision/config.toml`
//! or `~/.config/sdprovision/config.toml`.
//! Falls back to built-in defaults if no file exists.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use sdprovision::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load config");
//! println!("Data volume: {}", config.storage.data_dir.display());
//! println!("Community method: {:?}", config.community.method);
//! ```

pub mod schema;

pub use schema::{CommunityMethod, Config};
