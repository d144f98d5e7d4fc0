//! In-memory repository used by unit tests.

use super::{BidOrder, Repository, StorageError, StoreResult};
use crate::types::{Auction, AuctionStatus, Bid, Bidder};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Inner {
    auctions: HashMap<String, Auction>,
    bids: Vec<Bid>,
    bidders: HashMap<String, Bidder>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn get_auction(&self, id: &str) -> StoreResult<Option<Auction>> {
        Ok(self.inner.lock().auctions.get(id).cloned())
    }

    async fn list_active_auctions(&self) -> StoreResult<Vec<Auction>> {
        let inner = self.inner.lock();
        let mut active: Vec<Auction> = inner
            .auctions
            .values()
            .filter(|a| a.status == AuctionStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|a| a.end_time);
        Ok(active)
    }

    async fn insert_auction(&self, auction: &Auction) -> StoreResult<()> {
        self.inner
            .lock()
            .auctions
            .insert(auction.id.clone(), auction.clone());
        Ok(())
    }

    async fn save_auction(&self, auction: &Auction) -> StoreResult<()> {
        self.inner
            .lock()
            .auctions
            .insert(auction.id.clone(), auction.clone());
        Ok(())
    }

    async fn append_bid(&self, bid: &Bid) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(key) = &bid.external_comment_id {
            let taken = inner
                .bids
                .iter()
                .any(|b| b.external_comment_id.as_deref() == Some(key.as_str()));
            if taken {
                return Err(StorageError::DuplicateExternalComment);
            }
        }
        inner.bids.push(bid.clone());
        Ok(())
    }

    async fn update_bid(&self, bid: &Bid) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.bids.iter_mut().find(|b| b.id == bid.id) {
            Some(existing) => {
                existing.amount = bid.amount;
                existing.valid = bid.valid;
                existing.winning = bid.winning;
                Ok(())
            }
            None => Err(StorageError::Backend(format!("no such bid: {}", bid.id))),
        }
    }

    async fn list_bids(&self, auction_id: &str, order: BidOrder) -> StoreResult<Vec<Bid>> {
        let inner = self.inner.lock();
        let mut bids: Vec<Bid> = inner
            .bids
            .iter()
            .filter(|b| b.auction_id == auction_id)
            .cloned()
            .collect();
        match order {
            BidOrder::AmountDesc => {
                bids.sort_by(|a, b| {
                    b.amount
                        .cmp(&a.amount)
                        .then(a.created_at.cmp(&b.created_at))
                });
            }
            BidOrder::CreatedAsc => bids.sort_by_key(|b| b.created_at),
        }
        Ok(bids)
    }

    async fn find_bid_by_comment(&self, external_comment_id: &str) -> StoreResult<Option<Bid>> {
        Ok(self
            .inner
            .lock()
            .bids
            .iter()
            .find(|b| b.external_comment_id.as_deref() == Some(external_comment_id))
            .cloned())
    }

    async fn highest_valid_bid(&self, auction_id: &str) -> StoreResult<Option<Bid>> {
        let inner = self.inner.lock();
        let mut valid: Vec<&Bid> = inner
            .bids
            .iter()
            .filter(|b| b.auction_id == auction_id && b.valid)
            .collect();
        valid.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(valid.first().map(|b| (*b).clone()))
    }

    async fn distinct_bidders(&self, auction_id: &str) -> StoreResult<u32> {
        let inner = self.inner.lock();
        let bidders: HashSet<&str> = inner
            .bids
            .iter()
            .filter(|b| b.auction_id == auction_id)
            .map(|b| b.bidder_id.as_str())
            .collect();
        Ok(bidders.len() as u32)
    }

    async fn mark_winning(&self, auction_id: &str, bid_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for bid in inner.bids.iter_mut().filter(|b| b.auction_id == auction_id) {
            bid.winning = bid.id == bid_id;
        }
        Ok(())
    }

    async fn get_bidder(&self, id: &str) -> StoreResult<Option<Bidder>> {
        Ok(self.inner.lock().bidders.get(id).cloned())
    }

    async fn find_bidder_by_external(&self, external_id: &str) -> StoreResult<Option<Bidder>> {
        Ok(self
            .inner
            .lock()
            .bidders
            .values()
            .find(|b| b.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_bidder_by_name(&self, display_name: &str) -> StoreResult<Option<Bidder>> {
        Ok(self
            .inner
            .lock()
            .bidders
            .values()
            .find(|b| b.display_name == display_name)
            .cloned())
    }

    async fn insert_bidder(&self, bidder: &Bidder) -> StoreResult<()> {
        self.inner
            .lock()
            .bidders
            .insert(bidder.id.clone(), bidder.clone());
        Ok(())
    }
}
