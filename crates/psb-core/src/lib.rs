//! Core domain + application logic for the post-saver Telegram bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the userbot
//! gateway live behind ports (traits) implemented in adapter crates.

pub mod access;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod errors;
pub mod links;
pub mod logging;
pub mod ports;
pub mod saves;
pub mod session;

pub use errors::{Error, Result};
