//! Remote access to a coordination store over TCP.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON document.
//! A connection carries any number of request/response pairs in order.
//!
//! - [`serve`] exposes any [`rampart_core::KeyValueStore`] on a listener
//! - [`RemoteKeyValueStore`] implements the trait against such a server

mod client;
pub mod protocol;
mod server;

pub use client::RemoteKeyValueStore;
pub use client::RemoteStoreConfig;
pub use protocol::ProtocolError;
pub use protocol::Request;
pub use protocol::Response;
pub use server::serve;
