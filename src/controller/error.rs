//! Controller error taxonomy
//!
//! Transient I/O failures abandon the current tick; startup and config
//! failures abort the process. Insufficient price history and degenerate
//! search bounds are ordinary states, not errors.

use std::fmt;

use super::rate_search::RateKind;

#[derive(Debug)]
pub enum ControllerError {
    /// Price read from the rate store failed
    PriceUnavailable(anyhow::Error),
    /// A rate-update call failed; the in-memory rate is kept as decided
    RateWriteFailed {
        kind: RateKind,
        bps: u32,
        source: anyhow::Error,
    },
    /// Initial rates could not be read or the startup savings reset failed
    StartupFailed(anyhow::Error),
    InvalidConfig(String),
}

impl ControllerError {
    /// Errors the scheduler logs and survives.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PriceUnavailable(_) | Self::RateWriteFailed { .. }
        )
    }
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceUnavailable(e) => write!(f, "price unavailable: {:#}", e),
            Self::RateWriteFailed { kind, bps, source } => {
                write!(f, "{} rate write of {}bps failed: {:#}", kind, bps, source)
            }
            Self::StartupFailed(e) => write!(f, "startup failed: {:#}", e),
            Self::InvalidConfig(reason) => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PriceUnavailable(e) | Self::StartupFailed(e) => Some(e.as_ref()),
            Self::RateWriteFailed { source, .. } => Some(source.as_ref()),
            Self::InvalidConfig(_) => None,
        }
    }
}
