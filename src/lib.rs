pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod notifier;
pub mod policy;
pub mod screen;
pub mod session;
