use thiserror::Error;

use crate::bencode::BencodeError;

/// Errors surfaced by the node and its lookup operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No channel is bound to the node.
    #[error("channel not available")]
    ChannelNotAvailable,

    /// A response arrived whose transaction was registered for a
    /// different remote address. The transaction stays pending.
    #[error("response from unknown address")]
    ResponseFromUnknownAddress,

    /// The responder's node ID differs from the one previously known for
    /// that remote.
    #[error("response with unexpected node id")]
    ResponseWithUnexpectedNodeId,

    /// An incoming query was structurally invalid.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The remote answered a query with a KRPC error.
    #[error("remote error {code}: {message}")]
    ErrorResponse { code: i64, message: String },

    /// The query deadline expired.
    #[error("query timed out")]
    Timeout,

    /// The operation or the node was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Every transaction slot is occupied.
    #[error("transaction table exhausted")]
    TransactionsExhausted,

    /// A node ID or info-hash was not 20 bytes.
    #[error("invalid node id length")]
    InvalidNodeId,

    /// Wire payload failed to decode.
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),
}
