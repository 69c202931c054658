//! Typed rejection returned by every stage of an unfurl.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::net::IpAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnfurlError {
    #[error("missing ?url= parameter")]
    MissingUrl,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("only HTTP(S) schemes are allowed")]
    UnsupportedScheme(String),

    #[error("host is not allowed")]
    HostDenied(String),

    #[error("host is not in the allow list")]
    HostNotAllowed(String),

    #[error("cannot resolve target host")]
    Unresolvable(String),

    #[error("private or reserved IP address refused")]
    BlockedAddress { host: String, addrs: Vec<IpAddr> },

    #[error("link preview too large")]
    TooLarge,

    #[error("fetch timed out")]
    Timeout,

    #[error("cannot fetch the link preview")]
    Upstream(StatusCode),

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl UnfurlError {
    /// HTTP status surfaced to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl
            | Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::Unresolvable(_) => StatusCode::BAD_REQUEST,
            Self::HostDenied(_) | Self::HostNotAllowed(_) | Self::BlockedAddress { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(status) => *status,
            Self::TooManyRedirects => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for UnfurlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Internal(anyhow::Error::new(err).context("Failed to fetch URL"))
        }
    }
}

impl IntoResponse for UnfurlError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
