//! Command-line entry point for the background removal service
mod config;
#[path = "main.rs"]
mod main_impl;

pub use config::ServerConfig;
pub use main_impl::{main, Cli, Command, ServeArgs};
