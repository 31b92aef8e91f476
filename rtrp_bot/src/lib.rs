//! Internal modules for the card-room bot.
//!
//! This library provides configuration, the HTTP API client, command
//! parsing, the Hold'em view, and the automatic-play policy used by the
//! rtrp_bot binary.

pub mod api_client;
pub mod commands;
pub mod config;
pub mod holdem;
pub mod logging;
pub mod policy;
