//! Error types shared by the wire layer, the server and the discovery client.
//!
//! Every failure here is local to one connection or one discovery call.
//! Nothing in this module is ever treated as process-fatal.

use std::io;

/// Failures while reading or writing a length-framed message.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream part-way through a header or payload.
    #[error("truncated frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("payload length {length} exceeds limit of {max} bytes")]
    PayloadTooLarge { length: usize, max: usize },

    #[error("timed out waiting for frame payload")]
    Timeout,
}

/// Failures while turning payload bytes into messages and back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Violations of the provisioning protocol by a well-framed message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol version mismatch: expected {expected:?}, received {received:?}")]
    VersionMismatch { expected: String, received: String },

    #[error("unknown command code {0:#06x}")]
    UnknownCommand(u32),

    #[error("malformed payload: {0}")]
    Payload(#[from] CodecError),
}

/// Returned by [`Registry::register`](crate::registry::Registry::register)
/// when every slot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection registry full ({capacity} slots)")]
pub struct RegistryFull {
    pub capacity: usize,
}

/// Outcome of a failed discovery operation.
///
/// Each call returns its own value; there is no shared error buffer.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to resolve {name}: {reason}")]
    Resolve { name: String, reason: String },

    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed before a response arrived")]
    Closed,

    /// The cloudlet answered with an `"error"` string.
    #[error("cloudlet reported error: {0}")]
    Remote(String),

    /// The cloudlet answered with a non-success response code.
    #[error("cloudlet returned response code {0:#04x}")]
    Failed(u32),
}
