// ABOUTME: Command line surface: argument parsing, config, app wiring

pub mod app;
pub mod args;
pub mod config;

pub use config::Config;
