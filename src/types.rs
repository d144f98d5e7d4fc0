//! Core domain types shared across the engine.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Auction lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuctionStatus {
    Draft,
    Active,
    Ended,
    Cancelled,
}

/// Where a bid came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BidSource {
    Operator,
    ExternalComment,
    BuyNow,
    Test,
}

/// Why an auction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    TimeExpired,
    BuyNow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: String,
    pub title: String,
    pub description: String,
    pub starting_bid: Decimal,
    pub bid_increment: Decimal,
    /// Equals the highest committed valid bid; initialized to `starting_bid`.
    pub current_bid: Decimal,
    pub reserve_price: Option<Decimal>,
    pub buy_now_price: Option<Decimal>,
    pub end_time: DateTime<Utc>,
    pub status: AuctionStatus,
    pub auto_extend: bool,
    pub extension_minutes: i64,
    /// Social-platform post monitored for comment bids.
    pub external_post_id: Option<String>,
    pub winner_bidder_id: Option<String>,
    pub total_bids: u32,
    pub unique_bidders: u32,
    pub created_at: DateTime<Utc>,
}

impl Auction {
    /// Smallest acceptable next bid. `current_bid` starts at
    /// `starting_bid`, so the first bid must already clear one increment.
    pub fn minimum_bid(&self) -> Decimal {
        self.starting_bid.max(self.current_bid + self.bid_increment)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// True when a bid landing at `now` should trigger soft close.
    pub fn within_soft_close(&self, now: DateTime<Utc>) -> bool {
        self.auto_extend && self.end_time - now < Duration::minutes(self.extension_minutes)
    }

    /// Push `end_time` out by `extension_minutes`.
    pub fn extend(&mut self) -> (DateTime<Utc>, DateTime<Utc>) {
        let old = self.end_time;
        self.end_time = self.end_time + Duration::minutes(self.extension_minutes);
        (old, self.end_time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub auction_id: String,
    pub bidder_id: String,
    /// Display name cached at placement time.
    pub bidder_name: String,
    pub amount: Decimal,
    pub source: BidSource,
    /// Dedup key for platform-delivered bids; globally unique when present.
    pub external_comment_id: Option<String>,
    pub valid: bool,
    pub winning: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bidder {
    pub id: String,
    pub display_name: String,
    /// Platform identity, set for bidders first seen through comments.
    pub external_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Trimmed auction projection carried in responses and broadcast events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionView {
    pub id: String,
    pub current_bid: Decimal,
    pub total_bids: u32,
    pub unique_bidders: u32,
    pub end_time: DateTime<Utc>,
    pub status: AuctionStatus,
}

impl From<&Auction> for AuctionView {
    fn from(a: &Auction) -> Self {
        Self {
            id: a.id.clone(),
            current_bid: a.current_bid,
            total_bids: a.total_bids,
            unique_bidders: a.unique_bidders,
            end_time: a.end_time,
            status: a.status,
        }
    }
}
