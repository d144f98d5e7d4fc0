//! Social-platform abstraction.
//!
//! The engine never talks to the platform directly; it sees comments
//! through [`CommentSource`], whether they arrived by webhook push or
//! by polling. Both delivery paths converge on the same dedup key, the
//! external comment id.

mod graph;


pub use graph::GraphClient;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment fetched from the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub external_comment_id: String,
    pub external_author_id: String,
    pub author_display_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Comments on `post_id` newer than `cursor`, oldest first, with
    /// the cursor to use next.
    async fn fetch_comments_since(
        &self,
        post_id: &str,
        cursor: DateTime<Utc>,
    ) -> Result<(Vec<Comment>, DateTime<Utc>)>;

    /// Best-effort acknowledgement to the comment author. Failures are
    /// logged by the implementation, never surfaced.
    async fn reply_to_comment(&self, comment_id: &str, text: &str);
}

// --- Webhook envelope (platform → us) ---

/// Top-level webhook body: `{ object: "page", entry: [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    pub value: FeedChange,
}

/// One feed change record. `verb` is `add`, `edited` or `remove`;
/// `item` is `comment` for everything we act on.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedChange {
    pub verb: String,
    pub item: String,
    pub comment_id: String,
    pub post_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<CommentAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentAuthor {
    pub id: String,
    pub name: String,
}
