//! WebSocket HTTP handler for the web layer.
//!
//! This module only upgrades connections and hands them to the hub.
//! The Client actor, its pumps and the Hub control loop live in the `hub`
//! crate so they can be driven without an HTTP server.

pub mod handler;
