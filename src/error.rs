//! Error types for lifecycle-dns.

use std::net::AddrParseError;
use thiserror::Error;

/// Errors produced while decoding a raw bus envelope into a lifecycle event.
///
/// These are per-message errors: the dispatcher logs them and moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The outer envelope was not valid JSON or lacked the nested payload key.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The nested notification payload was not valid JSON.
    #[error("malformed notification payload: {0}")]
    Payload(#[source] serde_json::Error),

    /// The event type is not one of the recognized lifecycle events.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A field required by the event's type was absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// An address field did not parse as an IPv4 address.
    #[error("invalid address {address:?}: {source}")]
    InvalidAddress {
        /// The raw address string from the payload.
        address: String,
        /// The underlying parse error.
        #[source]
        source: AddrParseError,
    },
}

/// Errors from the control-plane collaborator.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The identity service refused to issue a token.
    #[error("authentication rejected by identity service: {0}")]
    AuthRejected(String),

    /// The compute API answered with a non-success status.
    #[error("compute API returned status {status} for {operation}")]
    Api {
        /// The operation that was attempted.
        operation: &'static str,
        /// HTTP status code returned by the API.
        status: u16,
    },
}

/// Errors from applying an update transaction to the name server.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The transaction never reached the name server.
    #[error("failed to reach the name server: {0}")]
    TransportFailure(#[from] std::io::Error),

    /// The name server (or the update utility) rejected the transaction.
    #[error("name server rejected the transaction: {detail}")]
    RejectedByServer {
        /// Diagnostic output captured from the update utility.
        detail: String,
    },
}

/// Failure of a single message's pipeline.
///
/// Contained by the dispatcher: logged, counted, never propagated to the
/// receive loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The envelope could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A control-plane lookup failed mid-pipeline.
    #[error(transparent)]
    Resolve(#[from] ComputeError),

    /// The DNS update transaction failed.
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Startup-fatal errors. These propagate to process exit.
#[derive(Debug, Error)]
pub enum SyncError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message bus connection or channel error.
    #[error("message bus error: {0}")]
    Bus(#[from] lapin::Error),

    /// Control-plane authentication or connectivity error.
    #[error("control plane error: {0}")]
    Compute(#[from] ComputeError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
