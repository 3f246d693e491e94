//! Error types shared across the dispatch engine and its external collaborators.

use thiserror::Error;

/// Errors that can cross an I/O or storage boundary inside `broker-core`.
///
/// Pure in-memory dispatch-engine operations (set/map mutation on the topic
/// and queue indices) never fail and so never need to construct one of these;
/// only the frame codec and the persistence adapter do.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A frame could not be decoded or encoded.
    #[error("frame codec error: {0}")]
    Codec(String),

    /// The persistence backend rejected an insert or fetch.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The client violated the protocol (e.g. the first frame on a new
    /// socket was not CONNECT).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The underlying socket failed while reading or writing a frame.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(e.to_string())
    }
}
