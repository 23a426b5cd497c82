//! Response frames, one per request.

use axum::response::sse::Event;
use serde_json::json;

use crate::origin::PLACEHOLDER_PAYLOAD;

/// How a frame's data was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Fresh data from one of the tiers.
    Data,
    /// An expired local entry served because the origin timed out.
    Stale,
    /// Nothing was available in time.
    Placeholder,
    /// The request was refused.
    Rejected,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Stale => "stale",
            Self::Placeholder => "placeholder",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Stale | Self::Placeholder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: String,
}

impl Frame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Data,
            data: data.into(),
        }
    }

    pub fn stale(data: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Stale,
            data: data.into(),
        }
    }

    /// The feed placeholder payload.
    pub fn placeholder() -> Self {
        Self::placeholder_with(PLACEHOLDER_PAYLOAD)
    }

    pub fn placeholder_with(data: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Placeholder,
            data: data.into(),
        }
    }

    pub fn rejected(message: &str) -> Self {
        Self {
            kind: FrameKind::Rejected,
            data: json!({ "error": message }).to_string(),
        }
    }

    pub fn into_event(self) -> Event {
        match self.kind {
            FrameKind::Data => Event::default().data(self.data),
            FrameKind::Stale | FrameKind::Placeholder => {
                Event::default().comment(self.kind.as_str()).data(self.data)
            }
            FrameKind::Rejected => Event::default().event("error").data(self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_frame_carries_json_error() {
        let frame = Frame::rejected("Invalid access token");
        assert_eq!(frame.kind, FrameKind::Rejected);
        assert_eq!(frame.data, r#"{"error":"Invalid access token"}"#);
    }

    #[test]
    fn test_placeholder_is_degraded() {
        let frame = Frame::placeholder();
        assert!(frame.kind.is_degraded());
        assert!(frame.data.contains("\"loading\""));
        assert!(!Frame::data("x").kind.is_degraded());
    }
}
