//! Error types shared by the provider core.

use thiserror::Error;

/// Failure reported by a [`GnssEngine`](crate::engine::GnssEngine) or one of
/// its extension capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine rejected an operation; `code` is the raw backend status.
    #[error("engine operation {op} failed with status {code}")]
    Rejected { op: &'static str, code: i32 },

    /// No hardware transport could be found while probing.
    #[error("no GNSS backend available (probed: {probed})")]
    NoBackend { probed: String },

    /// A backend transport exists but no binding for it is linked in.
    #[error("no binding linked for the {0} backend")]
    BindingUnavailable(&'static str),
}

impl EngineError {
    pub fn rejected(op: &'static str, code: i32) -> Self {
        Self::Rejected { op, code }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse an INI-style file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: ini::Error,
    },

    /// A key held a value that could not be interpreted.
    #[error("invalid configuration: {key} = '{value}' - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// NTP packet decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NtpError {
    #[error("NTP datagram has {0} bytes, expected 48")]
    WrongSize(usize),
}

/// Failure of a bus method call, reported to the calling peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MethodError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParams { name: String, reason: String },
}

impl MethodError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Protocol error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMethod(_) => crate::protocol::error_codes::UNKNOWN_METHOD,
            Self::InvalidParams { .. } => crate::protocol::error_codes::INVALID_PARAMS,
        }
    }
}
