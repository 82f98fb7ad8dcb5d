//! Play request failures surfaced to whoever issued the request.
//!
//! Once a stream is underway nothing is surfaced: sessions terminate themselves and log.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    /// Requested asset name escapes the sound root.
    #[error("asset name rejected: {0:?}")]
    PathRejected(String),

    /// Asset does not exist or cannot be opened.
    #[error("asset unavailable: {path:?}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A numeric parameter is outside its accepted range.
    #[error("invalid {name}: {value} (expected {expected})")]
    InvalidParameter {
        name: &'static str,
        value: f32,
        expected: &'static str,
    },

    #[error("no recipients for play request")]
    NoRecipients,
}
