//! Crate-wide error taxonomy.
//!
//! Mirrors the shape of `mesio_engine::error::DownloadError`: one variant per
//! failure class, `#[from]` conversions at the transport boundary, and a
//! handful of variants (`CancelledByPolicy`, `Replaced`) that are not really
//! errors but terminal *outcomes* the scheduler treats as PARTIAL completions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashBetaError {
    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    /// A download was intentionally stopped by the BETA policy. Not a real
    /// failure: the scheduler converts this into a PARTIAL completion.
    #[error("download cancelled by BETA policy")]
    CancelledByPolicy,

    /// A download was superseded by a forced lower-bitrate re-fetch of the
    /// same index. Not a real failure.
    #[error("segment replaced by drop-and-replace")]
    Replaced,

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("QUIC connection error: {source}")]
    Quic {
        #[from]
        source: quinn::ConnectionError,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DashBetaError {
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    /// Whether this error is a benign policy outcome rather than a genuine
    /// failure — the scheduler records these as PARTIAL, not as aborts.
    pub fn is_policy_outcome(&self) -> bool {
        matches!(self, Self::CancelledByPolicy | Self::Replaced)
    }
}

pub type Result<T> = std::result::Result<T, DashBetaError>;
