//! Bid acceptance state machine.
//!
//! Every state transition on a single auction (bid placement, comment
//! revision, finalization) runs under that auction's exclusive lock, so
//! acceptance order is total per auction. Broadcast emission goes
//! through the hub and never blocks or fails a transition.


use crate::directory::BidderDirectory;
use crate::error::Result;
use crate::hub::{AuctionEvent, BroadcastHub};
use crate::parser::parse_bid_amount;
use crate::platform::{Comment, CommentSource};
use crate::storage::{Repository, StorageError};
use crate::types::{Auction, AuctionStatus, AuctionView, Bid, BidSource, EndReason};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Per-auction exclusive locks, shared by the engine and the monitor.
#[derive(Default)]
pub struct AuctionLocks {
    map: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuctionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, auction_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.map.lock();
            map.entry(auction_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Forget an ended auction's lock entry.
    pub fn forget(&self, auction_id: &str) {
        self.map.lock().remove(auction_id);
    }
}

/// Why a bid was not accepted. Returned as a value, never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RejectReason {
    AuctionNotFound,
    AuctionNotActive,
    AuctionExpired,
    BidderNotFound,
    BidderInactive,
    DuplicateComment,
    BelowMinimum { minimum: Decimal },
}

impl RejectReason {
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::AuctionNotFound => "auction-not-found",
            RejectReason::AuctionNotActive => "auction-not-active",
            RejectReason::AuctionExpired => "auction-expired",
            RejectReason::BidderNotFound => "bidder-not-found",
            RejectReason::BidderInactive => "bidder-inactive",
            RejectReason::DuplicateComment => "duplicate-comment",
            RejectReason::BelowMinimum { .. } => "below-minimum",
        }
    }

    pub fn message(&self) -> String {
        match self {
            RejectReason::AuctionNotFound => "Auction not found".to_string(),
            RejectReason::AuctionNotActive => "Auction is not active".to_string(),
            RejectReason::AuctionExpired => "Auction has ended".to_string(),
            RejectReason::BidderNotFound => "Bidder not found".to_string(),
            RejectReason::BidderInactive => "Bidder account is inactive".to_string(),
            RejectReason::DuplicateComment => "Bid already placed for this comment".to_string(),
            RejectReason::BelowMinimum { minimum } => format!("Minimum bid is ${minimum:.2}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BidOutcome {
    Accepted { bid: Bid, auction: AuctionView },
    Rejected(RejectReason),
}

/// A bid placement request.
#[derive(Debug, Clone)]
pub struct PlaceBid {
    pub auction_id: String,
    pub bidder_id: String,
    pub amount: Decimal,
    pub source: BidSource,
    pub external_comment_id: Option<String>,
}

/// Result of a comment-edit revision.
#[derive(Debug, Clone)]
pub enum ReviseOutcome {
    /// Amount raised in place; the bid keeps its id and dedup key.
    Updated(Bid),
    /// Cosmetic edit; the stated amount did not change and the bid
    /// stands as-is.
    Unchanged,
    /// Edit lowered the amount or removed it; bid marked invalid.
    Invalidated,
    Rejected(RejectReason),
    UnknownComment,
}

pub struct BidEngine {
    repo: Arc<dyn Repository>,
    hub: Arc<BroadcastHub>,
    locks: Arc<AuctionLocks>,
}

impl BidEngine {
    pub fn new(repo: Arc<dyn Repository>, hub: Arc<BroadcastHub>, locks: Arc<AuctionLocks>) -> Self {
        Self { repo, hub, locks }
    }

    pub fn locks(&self) -> Arc<AuctionLocks> {
        Arc::clone(&self.locks)
    }

    /// Validate and commit a bid. Atomic per auction.
    pub async fn place_bid(&self, req: PlaceBid) -> Result<BidOutcome> {
        let _guard = self.locks.acquire(&req.auction_id).await;

        let Some(mut auction) = self.repo.get_auction(&req.auction_id).await? else {
            return Ok(BidOutcome::Rejected(RejectReason::AuctionNotFound));
        };
        if auction.status != AuctionStatus::Active {
            return Ok(BidOutcome::Rejected(RejectReason::AuctionNotActive));
        }
        let now = Utc::now();
        if auction.is_expired(now) {
            return Ok(BidOutcome::Rejected(RejectReason::AuctionExpired));
        }

        let Some(bidder) = self.repo.get_bidder(&req.bidder_id).await? else {
            return Ok(BidOutcome::Rejected(RejectReason::BidderNotFound));
        };
        if !bidder.is_active {
            return Ok(BidOutcome::Rejected(RejectReason::BidderInactive));
        }

        // Fast-path dedup check; the storage unique index is the
        // authoritative backstop under races.
        if let Some(comment_id) = &req.external_comment_id {
            if self.repo.find_bid_by_comment(comment_id).await?.is_some() {
                return Ok(BidOutcome::Rejected(RejectReason::DuplicateComment));
            }
        }

        let minimum = auction.minimum_bid();
        if req.amount < minimum {
            return Ok(BidOutcome::Rejected(RejectReason::BelowMinimum { minimum }));
        }

        let buy_now = matches!(auction.buy_now_price, Some(p) if req.amount >= p);
        let bid = Bid {
            id: uuid::Uuid::new_v4().to_string(),
            auction_id: auction.id.clone(),
            bidder_id: bidder.id.clone(),
            bidder_name: bidder.display_name.clone(),
            amount: req.amount,
            source: if buy_now { BidSource::BuyNow } else { req.source },
            external_comment_id: req.external_comment_id.clone(),
            valid: true,
            winning: true,
            created_at: now,
        };

        match self.repo.append_bid(&bid).await {
            Ok(()) => {}
            Err(StorageError::DuplicateExternalComment) => {
                return Ok(BidOutcome::Rejected(RejectReason::DuplicateComment));
            }
            Err(e) => return Err(e.into()),
        }

        auction.current_bid = req.amount;
        auction.winner_bidder_id = Some(bidder.id.clone());
        auction.total_bids += 1;
        auction.unique_bidders = self.repo.distinct_bidders(&auction.id).await?;

        if buy_now {
            auction.status = AuctionStatus::Ended;
            self.repo.save_auction(&auction).await?;
            self.repo.mark_winning(&auction.id, &bid.id).await?;

            self.hub.publish(AuctionEvent::AuctionEnded {
                auction_id: auction.id.clone(),
                winner_id: Some(bidder.id.clone()),
                winner_name: Some(bidder.display_name.clone()),
                final_amount: req.amount,
                reason: EndReason::BuyNow,
            });
            tracing::info!(
                "Buy-now accepted: {} by {} on {}",
                req.amount,
                bidder.display_name,
                auction.id
            );
            return Ok(BidOutcome::Accepted {
                bid,
                auction: AuctionView::from(&auction),
            });
        }

        // Soft close: a bid landing inside the extension window pushes
        // the end out to deter sniping.
        let extension = if auction.within_soft_close(now) {
            Some(auction.extend())
        } else {
            None
        };

        self.repo.save_auction(&auction).await?;
        self.repo.mark_winning(&auction.id, &bid.id).await?;

        // auction-extended goes out before the triggering new-bid; the
        // ordering within one transition is fixed, not incidental.
        if let Some((old_end, new_end)) = extension {
            self.hub.publish(AuctionEvent::AuctionExtended {
                auction_id: auction.id.clone(),
                old_end_time: old_end,
                new_end_time: new_end,
                extension_minutes: auction.extension_minutes,
            });
        }
        self.hub.publish(AuctionEvent::NewBid {
            auction_id: auction.id.clone(),
            bid: bid.clone(),
            auction: AuctionView::from(&auction),
        });

        tracing::debug!(
            "Bid accepted: {} by {} on {}",
            req.amount,
            bidder.display_name,
            auction.id
        );
        Ok(BidOutcome::Accepted {
            bid,
            auction: AuctionView::from(&auction),
        })
    }

    /// Comment edit. A higher amount re-validates and updates the bid
    /// row in place, keeping one row per comment id; an unchanged
    /// amount leaves a standing bid alone; a lower or unparseable
    /// amount invalidates the bid and recomputes the tip.
    pub async fn revise_comment_bid(
        &self,
        comment_id: &str,
        new_amount: Option<Decimal>,
    ) -> Result<ReviseOutcome> {
        let Some(prior) = self.repo.find_bid_by_comment(comment_id).await? else {
            return Ok(ReviseOutcome::UnknownComment);
        };

        let _guard = self.locks.acquire(&prior.auction_id).await;
        // Re-read under the lock; the row may have changed.
        let Some(mut bid) = self.repo.find_bid_by_comment(comment_id).await? else {
            return Ok(ReviseOutcome::UnknownComment);
        };
        let Some(mut auction) = self.repo.get_auction(&bid.auction_id).await? else {
            return Ok(ReviseOutcome::Rejected(RejectReason::AuctionNotFound));
        };

        match new_amount {
            // Wording-only edit: the stated amount is the one already on
            // record, so a standing bid keeps standing.
            Some(amount) if amount == bid.amount && bid.valid => Ok(ReviseOutcome::Unchanged),
            Some(amount) if amount > bid.amount => {
                if auction.status != AuctionStatus::Active {
                    return Ok(ReviseOutcome::Rejected(RejectReason::AuctionNotActive));
                }
                if auction.is_expired(Utc::now()) {
                    return Ok(ReviseOutcome::Rejected(RejectReason::AuctionExpired));
                }
                // Raising the winning bid competes only with itself;
                // everyone else must still clear the minimum.
                let minimum = auction.minimum_bid();
                if !bid.winning && amount < minimum {
                    return Ok(ReviseOutcome::Rejected(RejectReason::BelowMinimum { minimum }));
                }

                bid.amount = amount;
                bid.valid = true;
                self.repo.update_bid(&bid).await?;
                self.recompute_tip(&mut auction).await?;

                self.hub.publish(AuctionEvent::NewBid {
                    auction_id: auction.id.clone(),
                    bid: bid.clone(),
                    auction: AuctionView::from(&auction),
                });
                Ok(ReviseOutcome::Updated(bid))
            }
            _ => {
                // Lowering a bid after the fact is not honored; the old
                // amount no longer reflects intent either, so the bid
                // drops out entirely.
                bid.valid = false;
                self.repo.update_bid(&bid).await?;
                self.recompute_tip(&mut auction).await?;

                self.hub.publish(AuctionEvent::AuctionUpdate {
                    auction_id: auction.id.clone(),
                    time_remaining_secs: (auction.end_time - Utc::now()).num_seconds().max(0),
                    current_bid: auction.current_bid,
                    total_bids: auction.total_bids,
                });
                Ok(ReviseOutcome::Invalidated)
            }
        }
    }

    /// Comment removal: the bid no longer stands.
    pub async fn invalidate_comment_bid(&self, comment_id: &str) -> Result<bool> {
        let Some(prior) = self.repo.find_bid_by_comment(comment_id).await? else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(&prior.auction_id).await;
        let Some(mut bid) = self.repo.find_bid_by_comment(comment_id).await? else {
            return Ok(false);
        };
        if !bid.valid {
            return Ok(true);
        }
        let Some(mut auction) = self.repo.get_auction(&bid.auction_id).await? else {
            return Ok(false);
        };

        bid.valid = false;
        bid.winning = false;
        self.repo.update_bid(&bid).await?;
        self.recompute_tip(&mut auction).await?;

        self.hub.publish(AuctionEvent::AuctionUpdate {
            auction_id: auction.id.clone(),
            time_remaining_secs: (auction.end_time - Utc::now()).num_seconds().max(0),
            current_bid: auction.current_bid,
            total_bids: auction.total_bids,
        });
        Ok(true)
    }

    /// End an auction and pick the winner. Used by the monitor on
    /// expiry and by the backup sweep; buy-now ends inline in
    /// [`place_bid`]. No-op when the auction is not active.
    pub async fn finalize(&self, auction_id: &str, reason: EndReason) -> Result<Option<Auction>> {
        let _guard = self.locks.acquire(auction_id).await;

        let Some(mut auction) = self.repo.get_auction(auction_id).await? else {
            return Ok(None);
        };
        if auction.status != AuctionStatus::Active {
            return Ok(None);
        }

        auction.status = AuctionStatus::Ended;
        let winner = self.repo.highest_valid_bid(auction_id).await?;
        let (winner_id, winner_name, final_amount) = match &winner {
            Some(bid) => (
                Some(bid.bidder_id.clone()),
                Some(bid.bidder_name.clone()),
                bid.amount,
            ),
            None => (None, None, auction.starting_bid),
        };
        auction.winner_bidder_id = winner_id.clone();
        self.repo.save_auction(&auction).await?;
        if let Some(bid) = &winner {
            self.repo.mark_winning(auction_id, &bid.id).await?;
        }

        self.hub.publish(AuctionEvent::AuctionEnded {
            auction_id: auction.id.clone(),
            winner_id,
            winner_name: winner_name.clone(),
            final_amount,
            reason,
        });
        tracing::info!(
            "Auction ended: {} winner={} final={}",
            auction.id,
            winner_name.as_deref().unwrap_or("none"),
            final_amount
        );

        self.locks.forget(auction_id);
        Ok(Some(auction))
    }

    /// Re-derive the tip from the surviving valid bids. Caller holds
    /// the auction lock.
    async fn recompute_tip(&self, auction: &mut Auction) -> Result<()> {
        match self.repo.highest_valid_bid(&auction.id).await? {
            Some(top) => {
                auction.current_bid = top.amount;
                auction.winner_bidder_id = Some(top.bidder_id.clone());
                self.repo.mark_winning(&auction.id, &top.id).await?;
            }
            None => {
                auction.current_bid = auction.starting_bid;
                auction.winner_bidder_id = None;
                // Clears every winning flag; no bid carries this id.
                self.repo.mark_winning(&auction.id, "").await?;
            }
        }
        self.repo.save_auction(auction).await?;
        Ok(())
    }
}

/// Comment → bid pipeline shared by the monitor poll, the webhook and
/// the subscriber channel.
pub struct CommentIngestor {
    engine: Arc<BidEngine>,
    directory: BidderDirectory,
    source: Arc<dyn CommentSource>,
}

impl CommentIngestor {
    pub fn new(
        engine: Arc<BidEngine>,
        directory: BidderDirectory,
        source: Arc<dyn CommentSource>,
    ) -> Self {
        Self {
            engine,
            directory,
            source,
        }
    }

    /// Parse one comment and try to place it as a bid. Duplicate
    /// comments are expected on redelivery and stay silent.
    pub async fn ingest_comment(&self, auction_id: &str, comment: &Comment) -> Result<()> {
        let Some(amount) = parse_bid_amount(&comment.text) else {
            tracing::debug!(
                "No bid in comment {} ({:?})",
                comment.external_comment_id,
                comment.text
            );
            return Ok(());
        };

        let bidder = self
            .directory
            .resolve_or_create(&comment.external_author_id, &comment.author_display_name)
            .await?;

        let outcome = self
            .engine
            .place_bid(PlaceBid {
                auction_id: auction_id.to_string(),
                bidder_id: bidder.id,
                amount,
                source: BidSource::ExternalComment,
                external_comment_id: Some(comment.external_comment_id.clone()),
            })
            .await?;

        match outcome {
            BidOutcome::Accepted { bid, .. } => {
                self.source
                    .reply_to_comment(
                        &comment.external_comment_id,
                        &format!("Bid confirmed: ${:.2}", bid.amount),
                    )
                    .await;
            }
            BidOutcome::Rejected(RejectReason::DuplicateComment) => {}
            BidOutcome::Rejected(reason) => {
                tracing::debug!(
                    "Comment bid rejected ({}): {}",
                    comment.external_comment_id,
                    reason.message()
                );
                self.source
                    .reply_to_comment(
                        &comment.external_comment_id,
                        &format!("Bid failed: {}", reason.message()),
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Webhook `edited` record. Unknown comment ids fall back to the
    /// add path in the caller.
    pub async fn handle_edit(&self, comment_id: &str, message: &str) -> Result<ReviseOutcome> {
        let new_amount = parse_bid_amount(message);
        let outcome = self.engine.revise_comment_bid(comment_id, new_amount).await?;
        match &outcome {
            ReviseOutcome::Updated(bid) => {
                self.source
                    .reply_to_comment(comment_id, &format!("Bid updated: ${:.2}", bid.amount))
                    .await;
            }
            ReviseOutcome::Invalidated => {
                self.source
                    .reply_to_comment(comment_id, "Bid is no longer valid due to edit.")
                    .await;
            }
            _ => {}
        }
        Ok(outcome)
    }

    pub async fn handle_remove(&self, comment_id: &str) -> Result<bool> {
        self.engine.invalidate_comment_bid(comment_id).await
    }
}
