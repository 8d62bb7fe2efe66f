//! TCP relay: clients connect, receive an id, and exchange length-prefixed
//! binary messages through a single global broadcast domain.
//!
//! - [`codec`] frames payloads and reads/writes little-endian integers.
//! - [`message`] defines the tagged client/server messages.
//! - [`connection`] owns one peer socket, its receive buffer, and liveness.
//! - [`registry`] keeps live connections in accept order by identity.
//! - [`router`] maps each decoded message onto broadcasts, unicasts, store
//!   updates, or a disconnect.
//! - [`store`] holds labelled blobs for `StoreData` / `RetrieveData`.
//! - [`server`] runs the accept/receive event loop on a single task.
//! - [`client`] and [`console`] implement a terminal client for the relay.
//! - [`discovery`] advertises a running relay over mDNS.
//! - [`cli`] parses the `serve` and `client` subcommands.
//!
//! Integration tests drive the server over real sockets using
//! [`client::RelayClient`].

pub mod cli;
pub mod client;
pub mod codec;
pub mod connection;
pub mod discovery;
pub mod console;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
