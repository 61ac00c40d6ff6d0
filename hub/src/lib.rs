//! Real-time fan-out hub for chat clients connected over WebSockets.
//!
//! # Architecture
//!
//! - **Single-owner registry**: the [`Hub`] control loop is the only code that
//!   touches the set of registered clients and the user-id index. Everything
//!   else talks to it through a cloneable [`HubHandle`].
//! - **One event per step**: registration, unregistration and broadcast
//!   requests are handled one at a time, so every `client_info` snapshot is
//!   consistent with the mutation that produced it.
//! - **Bounded mailboxes**: each client has a fixed-size outbound queue. The
//!   hub never waits on it; a full queue evicts the client instead of slowing
//!   down everyone else.
//! - **Two pumps per client**: the inbound pump decodes frames and forwards
//!   chat messages to the hub, the outbound pump drains the client's queue
//!   back to the socket and closes it once the hub seals the queue.
//!
//! # Message Flow
//!
//! 1. The upgrade layer builds a [`Client`] and its [`ClientPumps`] half
//! 2. `HubHandle::register` adds the client and broadcasts `client_info`
//! 3. The inbound pump turns `message` frames into broadcasts, stamping a
//!    timestamp when the sender left it out
//! 4. The hub offers each broadcast to every client's queue without blocking
//! 5. On disconnect the inbound pump calls `HubHandle::unregister`, the hub
//!    seals the client's queue and broadcasts the new `client_info`
//!
//! # Known gap
//!
//! A client's user id is indexed only when it is registered. Browsers send
//! `user_join` after the socket is up, which is after registration, so those
//! users are counted in `totalClients` but not listed in `onlineUsers`. The
//! upgrade layer can bind an id before registering with [`Client::identify`].
//!
//! # Modules
//!
//! - `client`: Client actor, its identity and both pumps
//! - `hub`: control loop and its handle
//! - `message`: wire envelopes, two-step decoding and presence snapshots
//! - `error`: hub error type and kinds

pub mod client;
pub mod error;
pub mod hub;
pub mod message;
mod registry;

pub use client::{Client, ClientId, ClientPumps};
pub use hub::{Hub, HubHandle};
