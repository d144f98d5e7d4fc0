//! Abstract persistence for auctions, bids and bidders.
//!
//! The engine only ever talks to the [`Repository`] trait. Production
//! runs on [`SqliteStore`]; tests use [`MemoryStore`].

mod memory;
mod sqlite;


pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::types::{Auction, Bid, Bidder};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The bid's `external_comment_id` is already recorded.
    #[error("duplicate external comment id")]
    DuplicateExternalComment,

    #[error("storage backend: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StorageError::DuplicateExternalComment;
            }
        }
        StorageError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Ordering for bid listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidOrder {
    /// Highest amount first; earliest placement breaks ties.
    AmountDesc,
    CreatedAsc,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_auction(&self, id: &str) -> StoreResult<Option<Auction>>;
    async fn list_active_auctions(&self) -> StoreResult<Vec<Auction>>;
    async fn insert_auction(&self, auction: &Auction) -> StoreResult<()>;
    async fn save_auction(&self, auction: &Auction) -> StoreResult<()>;

    /// Append a bid. Fails atomically with
    /// [`StorageError::DuplicateExternalComment`] when the comment id
    /// collides with any previously stored bid.
    async fn append_bid(&self, bid: &Bid) -> StoreResult<()>;
    async fn update_bid(&self, bid: &Bid) -> StoreResult<()>;
    async fn list_bids(&self, auction_id: &str, order: BidOrder) -> StoreResult<Vec<Bid>>;
    async fn find_bid_by_comment(&self, external_comment_id: &str) -> StoreResult<Option<Bid>>;
    /// Highest-amount valid bid; earliest placement wins a tie.
    async fn highest_valid_bid(&self, auction_id: &str) -> StoreResult<Option<Bid>>;
    async fn distinct_bidders(&self, auction_id: &str) -> StoreResult<u32>;
    /// Atomically clear `winning` on every other bid of the auction and
    /// set it on `bid_id`.
    async fn mark_winning(&self, auction_id: &str, bid_id: &str) -> StoreResult<()>;

    async fn get_bidder(&self, id: &str) -> StoreResult<Option<Bidder>>;
    async fn find_bidder_by_external(&self, external_id: &str) -> StoreResult<Option<Bidder>>;
    async fn find_bidder_by_name(&self, display_name: &str) -> StoreResult<Option<Bidder>>;
    async fn insert_bidder(&self, bidder: &Bidder) -> StoreResult<()>;
}

/// Monetary values persist as integer cents; floats never hit disk.
pub(crate) fn to_cents(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .unwrap_or(i64::MAX)
}

pub(crate) fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
