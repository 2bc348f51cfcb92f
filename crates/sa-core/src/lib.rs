//! Shared core abstractions for the SafetyAmp reconciler.
//!
//! This crate defines the cross-crate contracts used by every other member of the
//! workspace: the error/result vocabulary, the entity data model, the pure-function
//! validator, the cache-store and ERP-reader trait seams, and environment-driven
//! configuration. Nothing here performs network or disk I/O beyond what the trait
//! contracts require of their implementers.

use std::fmt;

pub mod config;
pub mod fingerprint;
pub mod models;
pub mod traits;
pub mod validator;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every component (see `SPEC_FULL.md` §7).
#[derive(Debug)]
pub enum Error {
    /// Non-429 4xx/5xx response, carrying status and decoded body.
    Http { status: u16, body: String },
    /// HTTP 429; caller is expected to have already exhausted retries.
    RateLimited,
    /// Connection/timeout/DNS failure.
    Network(String),
    /// Cache backend failure (Redis or disk).
    Cache(String),
    /// Validator-rejected payload.
    Validation(String),
    /// Startup misconfiguration.
    Config(String),
    /// Catch-all for anything that doesn't fit the taxonomy above.
    Other(anyhow::Error),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Other(anyhow::anyhow!(message.into()))
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { status, body } => write!(f, "http error {status}: {body}"),
            Error::RateLimited => write!(f, "rate limited (429)"),
            Error::Network(msg) => write!(f, "network error: {msg}"),
            Error::Cache(msg) => write!(f, "cache error: {msg}"),
            Error::Validation(msg) => write!(f, "validation error: {msg}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Other(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Other(err) => err.source(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value)
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() || value.is_connect() {
            Self::Network(value.to_string())
        } else {
            Self::Other(anyhow::Error::from(value))
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Other(anyhow::Error::from(value))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Other(anyhow::Error::from(value))
    }
}
