use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::change_request::ChangeRequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentId(pub String);

/// Discussion entry attached to a change request. Append-only; comments may
/// be added at any lifecycle state, including after implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub change_request_id: ChangeRequestId,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
