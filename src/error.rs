use std::io;
use std::net::SocketAddr;

use crate::key::Key;

/// Errors surfaced by a node, its RPCs and the vanish layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An identifier was not exactly `KEY_LENGTH` bytes of hex.
    #[error("malformed identifier: {0:?}")]
    MalformedIdentifier(String),

    /// The routing table does not know the requested node.
    #[error("contact not found: {0}")]
    ContactNotFound(Key),

    /// The remote peer could not be reached or did not answer in time.
    #[error("rpc to {addr} unavailable: {reason}")]
    RpcUnavailable { addr: SocketAddr, reason: String },

    /// The remote peer reported a failure in its response.
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote peer answered with a payload that does not match the request.
    #[error("unexpected response payload")]
    UnexpectedResponse,

    /// Fewer than `needed` distinct key shares were available.
    #[error("insufficient shares: need {needed}, found {found}")]
    InsufficientShares { needed: u8, found: usize },

    #[error("invalid share parameters: {threshold} of {shares}")]
    InvalidShareParameters { shares: u8, threshold: u8 },

    /// No vanishing data object is registered under the id.
    #[error("vanishing data object not found: {0}")]
    VdoNotFound(Key),

    #[error("crypto failure: {0}")]
    Crypto(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to encode or decode message: {0}")]
    Encoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
