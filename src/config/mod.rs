//! Configuration management module
//!
//! TOML-based configuration loaded once at startup.

mod config;

pub use config::*;
