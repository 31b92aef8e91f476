//! Networking layer: wire model, socket loop, and message routing.

/// Connected client that ties the socket, dispatcher, and session together.
pub mod client;

/// Socket lifecycle and the single receive loop.
pub mod connection;

/// Tag-keyed handler registry.
pub mod dispatcher;

/// Error types for client operations.
pub mod errors;

/// Envelopes, tags, and ordering timestamps.
pub mod messages;

/// Frame encoding limits and helpers.
pub mod utils;
