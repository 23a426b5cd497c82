//! Errors that cross the request boundary.
//!
//! Only contract errors and authentication rejections end up here. Shared
//! cache and origin failures are absorbed by the tiers and become misses or
//! degraded frames.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response, Sse};
use futures_util::stream;

use crate::cache::TokenRejection;
use crate::feed::Frame;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A required query parameter is absent or blank.
    #[error("{0} parameter required")]
    MissingParameter(&'static str),

    #[error("request rejected: {0}")]
    Rejected(TokenRejection),
}

impl FeedError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Client-facing message. Rejection details stay in the logs.
    pub fn message(&self) -> String {
        match self {
            Self::MissingParameter(_) => self.to_string(),
            Self::Rejected(_) => "Invalid access token".to_string(),
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::rejected(&self.message())
    }
}

impl From<TokenRejection> for FeedError {
    fn from(rejection: TokenRejection) -> Self {
        Self::Rejected(rejection)
    }
}

/// Errors are delivered on the event stream as an `error` event so that
/// EventSource clients can observe them.
impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let event = self.to_frame().into_event();
        let body = Sse::new(stream::once(async move {
            Ok::<_, std::convert::Infallible>(event)
        }));
        (self.status(), body).into_response()
    }
}
