pub mod config;
pub mod core;
pub mod error;
pub mod http;
pub mod logging;

#[cfg(feature = "cli")]
pub mod cli;
