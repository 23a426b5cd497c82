use serde::{Deserialize, Serialize};

/// One comment or question posted to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "knwlg_session_qna_id")]
    pub id: i64,
    pub user_master_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image: Option<String>,
    pub comment: Option<String>,
    pub comment_approve_status: i32,
    pub status: Option<String>,
    pub type_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A poll attached to a session, with the viewer's answer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub survey_id: i64,
    pub is_show: i32,
    pub is_answer_show: i32,
    /// Id of the viewer's answer, `0` when unanswered.
    pub is_answered: i64,
}

/// Body of every `data:` frame on the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPayload {
    pub comment_data: Vec<Comment>,
    pub survey_data: Vec<Poll>,
    pub session_status: String,
}

/// Sent when nothing better is available in time.
pub const PLACEHOLDER_PAYLOAD: &str =
    r#"{"comment_data":[],"survey_data":[],"session_status":"loading"}"#;

impl FeedPayload {
    pub fn placeholder() -> Self {
        Self {
            comment_data: Vec::new(),
            survey_data: Vec::new(),
            session_status: "loading".to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain structs with string keys cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| PLACEHOLDER_PAYLOAD.to_string())
    }
}
