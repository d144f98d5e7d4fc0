//! Graph API client for post comments.

use super::{Comment, CommentSource};
use crate::config::{IntegrationMode, PlatformConfig};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub struct GraphClient {
    config: PlatformConfig,
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    /// Polling is only wired up in automatic mode with a token present.
    pub fn enabled(&self) -> bool {
        self.config.integration_mode == IntegrationMode::Auto
            && !self.config.access_token.is_empty()
    }
}

#[async_trait]
impl CommentSource for GraphClient {
    async fn fetch_comments_since(
        &self,
        post_id: &str,
        cursor: DateTime<Utc>,
    ) -> Result<(Vec<Comment>, DateTime<Utc>)> {
        let url = format!("{}/{}/comments", self.config.base_url, post_id);
        let resp: serde_json::Value = self
            .http
            .get(&url)
            .query(&[
                ("access_token", self.config.access_token.as_str()),
                ("fields", "id,message,created_time,from"),
                ("order", "chronological"),
                ("limit", "50"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut comments = Vec::new();
        let mut new_cursor = cursor;

        if let Some(items) = resp["data"].as_array() {
            for item in items {
                let created_at = item["created_time"]
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc));
                let Some(created_at) = created_at else {
                    continue;
                };
                if created_at <= cursor {
                    continue;
                }

                let Some(id) = item["id"].as_str() else {
                    continue;
                };
                comments.push(Comment {
                    external_comment_id: id.to_string(),
                    external_author_id: item["from"]["id"].as_str().unwrap_or("").to_string(),
                    author_display_name: item["from"]["name"]
                        .as_str()
                        .unwrap_or("Unknown")
                        .to_string(),
                    text: item["message"].as_str().unwrap_or("").to_string(),
                    created_at,
                });
                if created_at > new_cursor {
                    new_cursor = created_at;
                }
            }
        }

        // The API returns chronological order, but keep the guarantee
        // explicit for callers.
        comments.sort_by_key(|c| c.created_at);
        Ok((comments, new_cursor))
    }

    async fn reply_to_comment(&self, comment_id: &str, text: &str) {
        let url = format!("{}/{}/comments", self.config.base_url, comment_id);
        let body = serde_json::json!({
            "message": text,
            "access_token": self.config.access_token,
        });
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!("Comment reply rejected: {} ({})", comment_id, resp.status());
            }
            Err(e) => {
                tracing::warn!("Comment reply failed: {} ({})", comment_id, e);
            }
        }
    }
}
