//! Topic-based broadcast fabric.
//!
//! Topics are auction ids. Delivery is at-most-once per live
//! subscription: each topic is a bounded `tokio::sync::broadcast`
//! channel, so a subscriber that falls behind loses the oldest events
//! rather than stalling the publisher. Reconnecting subscribers catch
//! up from the repository, not from the hub.


use crate::types::{AuctionView, Bid, EndReason};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Everything pushed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuctionEvent {
    NewBid {
        auction_id: String,
        bid: Bid,
        auction: AuctionView,
    },
    AuctionUpdate {
        auction_id: String,
        time_remaining_secs: i64,
        current_bid: Decimal,
        total_bids: u32,
    },
    AuctionExtended {
        auction_id: String,
        old_end_time: DateTime<Utc>,
        new_end_time: DateTime<Utc>,
        extension_minutes: i64,
    },
    TimeWarning {
        auction_id: String,
        minutes_remaining: i64,
    },
    AuctionEnded {
        auction_id: String,
        winner_id: Option<String>,
        winner_name: Option<String>,
        final_amount: Decimal,
        reason: EndReason,
    },
}

impl AuctionEvent {
    pub fn auction_id(&self) -> &str {
        match self {
            AuctionEvent::NewBid { auction_id, .. }
            | AuctionEvent::AuctionUpdate { auction_id, .. }
            | AuctionEvent::AuctionExtended { auction_id, .. }
            | AuctionEvent::TimeWarning { auction_id, .. }
            | AuctionEvent::AuctionEnded { auction_id, .. } => auction_id,
        }
    }
}

pub struct BroadcastHub {
    topics: RwLock<HashMap<String, broadcast::Sender<AuctionEvent>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Publish to a topic. Never blocks and never fails: a topic with
    /// no subscribers simply drops the event.
    pub fn publish(&self, event: AuctionEvent) {
        let topics = self.topics.read();
        if let Some(tx) = topics.get(event.auction_id()) {
            // send only errs when there are no receivers.
            let _ = tx.send(event);
        }
    }

    /// Join a topic. Events published after this call are delivered in
    /// emission order until the receiver lags past `capacity`.
    pub fn subscribe(&self, auction_id: &str) -> broadcast::Receiver<AuctionEvent> {
        let mut topics = self.topics.write();
        topics
            .entry(auction_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop topics nobody listens to anymore (ended auctions).
    pub fn prune(&self) {
        self.topics.write().retain(|_, tx| tx.receiver_count() > 0);
    }

    pub fn subscriber_count(&self, auction_id: &str) -> usize {
        self.topics
            .read()
            .get(auction_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}
