//! Stash Server - serves a configured storage over the stash HTTP protocol

pub mod config;
pub mod server;

pub use config::{CacheConfig, Config};
pub use server::{ServerState, router, run_server, serve};
