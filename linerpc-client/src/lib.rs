//! # linerpc-client
//!
//! Client library for linerpc.
//!
//! The server answers one request per connection and then closes it, so
//! every call here opens a fresh connection, writes one line, and reads one
//! response line.

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
