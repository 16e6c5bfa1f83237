//! Error taxonomy shared by the extraction adapter and the download manager.

use axum::http::StatusCode;
use thiserror::Error;

/// Failures surfaced by [`crate::extractor::ExtractionClient`].
///
/// The `BackendFailure` detail is meant for logs only; it may carry engine
/// stderr and therefore internal paths.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no extractable info for the requested URL")]
    NotFound,

    #[error("format not recognized for this URL")]
    InvalidFormat,

    #[error("extraction backend failure: {0}")]
    BackendFailure(String),
}

/// Terminal failure reasons of a download session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("invalid video URL")]
    InvalidUrl,

    #[error("missing format identifier")]
    MissingFormat,

    #[error("no usable info or formats")]
    NotFound,

    #[error("unrecognized format identifier")]
    InvalidFormat,

    #[error("backend failure: {0}")]
    BackendFailure(String),

    #[error("engine reported success but produced no output")]
    ArtifactMissing,

    #[error("transfer interrupted")]
    StreamInterrupted,
}

impl DownloadError {
    /// HTTP status category reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUrl | Self::MissingFormat => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidFormat
            | Self::BackendFailure(_)
            | Self::ArtifactMissing
            | Self::StreamInterrupted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put in a response body. Never includes engine detail.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "Invalid YouTube URL.",
            Self::MissingFormat => "Quality (itag) must be selected.",
            Self::NotFound => "No downloadable formats found.",
            Self::InvalidFormat => "Requested quality is not available for this video.",
            Self::BackendFailure(_) => "Download failed.",
            Self::ArtifactMissing => "Download failed: the extractor produced no file.",
            Self::StreamInterrupted => "Download interrupted.",
        }
    }
}

impl From<ExtractionError> for DownloadError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::NotFound => Self::NotFound,
            ExtractionError::InvalidFormat => Self::InvalidFormat,
            ExtractionError::BackendFailure(detail) => Self::BackendFailure(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_client_errors() {
        assert_eq!(DownloadError::InvalidUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(DownloadError::MissingFormat.status(), StatusCode::BAD_REQUEST);
        assert_eq!(DownloadError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            DownloadError::InvalidFormat.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DownloadError::ArtifactMissing.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn backend_detail_never_reaches_client_message() {
        let err = DownloadError::from(ExtractionError::BackendFailure(
            "ERROR: unable to write /srv/downloads/session-1234/media.mp4".into(),
        ));
        assert!(matches!(err, DownloadError::BackendFailure(_)));
        assert!(!err.client_message().contains("/srv"));
        assert!(!err.client_message().contains("session-"));
    }
}
