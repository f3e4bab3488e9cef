//! # linerpc-protocol
//!
//! Wire protocol for linerpc.
//!
//! This crate provides:
//! - Newline-delimited framing over a streaming byte buffer
//! - JSON request/response types
//! - Protocol error types

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{encode_line, Frames, LineDecoder};
pub use error::ProtocolError;
pub use message::{json_kind, Request, Response};

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Default port for the linerpc server.
pub const DEFAULT_PORT: u16 = 8080;
