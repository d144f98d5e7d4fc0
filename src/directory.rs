//! Bidder identity resolution.

use crate::error::Result;
use crate::storage::Repository;
use crate::types::Bidder;
use chrono::Utc;
use std::sync::Arc;

/// Resolves platform identities and operator-entered names to bidder
/// records, creating them on first sighting. Display names are frozen
/// at creation; a reappearing identity keeps its original record.
#[derive(Clone)]
pub struct BidderDirectory {
    repo: Arc<dyn Repository>,
}

impl BidderDirectory {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Resolve a platform identity, creating a bidder on first sighting.
    pub async fn resolve_or_create(&self, external_id: &str, display_name: &str) -> Result<Bidder> {
        if let Some(existing) = self.repo.find_bidder_by_external(external_id).await? {
            return Ok(existing);
        }

        let bidder = Bidder {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            external_id: Some(external_id.to_string()),
            is_active: true,
            created_at: Utc::now(),
        };
        self.repo.insert_bidder(&bidder).await?;
        tracing::info!("New bidder from platform: {} ({})", display_name, external_id);
        Ok(bidder)
    }

    /// Operator entry names bidders by display name; such bidders carry
    /// no external identity.
    pub async fn resolve_by_name(&self, display_name: &str) -> Result<Bidder> {
        if let Some(existing) = self.repo.find_bidder_by_name(display_name).await? {
            return Ok(existing);
        }

        let bidder = Bidder {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            external_id: None,
            is_active: true,
            created_at: Utc::now(),
        };
        self.repo.insert_bidder(&bidder).await?;
        Ok(bidder)
    }
}
