//! Error types for the reqwest-proxy-racer crate.

use thiserror::Error;

/// Error returned when a proxy is requested from an empty pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No proxy available in pool")]
pub struct EmptyPool;

/// Error surfaced to the caller of a race.
#[derive(Debug, Error)]
pub enum RaceError {
    /// The pool had no proxy to bind an attempt to.
    #[error("No proxy available in pool")]
    EmptyPool,

    /// The deadline passed without any attempt returning an acceptable response.
    #[error("No acceptable response before the deadline after {attempts} attempts")]
    Timeout { attempts: usize },

    /// The request cannot be replayed through several proxies.
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    UncloneableRequest,
}

impl From<EmptyPool> for RaceError {
    fn from(_: EmptyPool) -> Self {
        RaceError::EmptyPool
    }
}

/// Failure of a single attempt at the transport level.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The proxy address could not be turned into a client proxy.
    #[error("Invalid proxy {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    /// Connection failure, unreachable proxy, malformed response, ...
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Anything else, including a panic inside the transport.
    #[error("Unexpected attempt failure: {0}")]
    Unexpected(String),
}

/// Error returned when parsing a proxy address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed proxy address: {0}")]
    Malformed(String),
}
