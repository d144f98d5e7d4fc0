//! SQLite-backed repository.

use super::{from_cents, to_cents, BidOrder, Repository, StorageError, StoreResult};
use crate::types::{Auction, AuctionStatus, Bid, BidSource, Bidder};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS auctions (
    id                  TEXT PRIMARY KEY,
    title               TEXT NOT NULL,
    description         TEXT NOT NULL DEFAULT '',
    starting_bid_cents  INTEGER NOT NULL,
    bid_increment_cents INTEGER NOT NULL,
    current_bid_cents   INTEGER NOT NULL,
    reserve_price_cents INTEGER,
    buy_now_price_cents INTEGER,
    end_time            TEXT NOT NULL,
    status              TEXT NOT NULL,
    auto_extend         INTEGER NOT NULL DEFAULT 0,
    extension_minutes   INTEGER NOT NULL DEFAULT 5,
    external_post_id    TEXT,
    winner_bidder_id    TEXT,
    total_bids          INTEGER NOT NULL DEFAULT 0,
    unique_bidders      INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_auctions_status_end
    ON auctions(status, end_time);
CREATE TABLE IF NOT EXISTS bidders (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    external_id  TEXT,
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bidders_external
    ON bidders(external_id) WHERE external_id IS NOT NULL;
CREATE TABLE IF NOT EXISTS bids (
    id                  TEXT PRIMARY KEY,
    auction_id          TEXT NOT NULL REFERENCES auctions(id),
    bidder_id           TEXT NOT NULL REFERENCES bidders(id),
    bidder_name         TEXT NOT NULL,
    amount_cents        INTEGER NOT NULL,
    source              TEXT NOT NULL,
    external_comment_id TEXT,
    valid               INTEGER NOT NULL DEFAULT 1,
    winning             INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_bids_comment
    ON bids(external_comment_id) WHERE external_comment_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_bids_auction_amount
    ON bids(auction_id, amount_cents DESC);
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and bootstrap the schema. A failure here is fatal at
    /// startup; the caller refuses to serve.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(StorageError::from)?;

        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> StoreResult<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn status_str(status: AuctionStatus) -> &'static str {
    match status {
        AuctionStatus::Draft => "draft",
        AuctionStatus::Active => "active",
        AuctionStatus::Ended => "ended",
        AuctionStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> StoreResult<AuctionStatus> {
    match s {
        "draft" => Ok(AuctionStatus::Draft),
        "active" => Ok(AuctionStatus::Active),
        "ended" => Ok(AuctionStatus::Ended),
        "cancelled" => Ok(AuctionStatus::Cancelled),
        other => Err(StorageError::Backend(format!(
            "unknown auction status: {other}"
        ))),
    }
}

fn source_str(source: BidSource) -> &'static str {
    match source {
        BidSource::Operator => "operator",
        BidSource::ExternalComment => "external-comment",
        BidSource::BuyNow => "buy-now",
        BidSource::Test => "test",
    }
}

fn parse_source(s: &str) -> StoreResult<BidSource> {
    match s {
        "operator" => Ok(BidSource::Operator),
        "external-comment" => Ok(BidSource::ExternalComment),
        "buy-now" => Ok(BidSource::BuyNow),
        "test" => Ok(BidSource::Test),
        other => Err(StorageError::Backend(format!("unknown bid source: {other}"))),
    }
}

fn auction_from_row(row: &SqliteRow) -> StoreResult<Auction> {
    let status: String = row.try_get("status").map_err(StorageError::from)?;
    Ok(Auction {
        id: row.try_get("id").map_err(StorageError::from)?,
        title: row.try_get("title").map_err(StorageError::from)?,
        description: row.try_get("description").map_err(StorageError::from)?,
        starting_bid: from_cents(row.try_get("starting_bid_cents").map_err(StorageError::from)?),
        bid_increment: from_cents(row.try_get("bid_increment_cents").map_err(StorageError::from)?),
        current_bid: from_cents(row.try_get("current_bid_cents").map_err(StorageError::from)?),
        reserve_price: row
            .try_get::<Option<i64>, _>("reserve_price_cents")
            .map_err(StorageError::from)?
            .map(from_cents),
        buy_now_price: row
            .try_get::<Option<i64>, _>("buy_now_price_cents")
            .map_err(StorageError::from)?
            .map(from_cents),
        end_time: row.try_get("end_time").map_err(StorageError::from)?,
        status: parse_status(&status)?,
        auto_extend: row.try_get("auto_extend").map_err(StorageError::from)?,
        extension_minutes: row.try_get("extension_minutes").map_err(StorageError::from)?,
        external_post_id: row.try_get("external_post_id").map_err(StorageError::from)?,
        winner_bidder_id: row.try_get("winner_bidder_id").map_err(StorageError::from)?,
        total_bids: row.try_get::<i64, _>("total_bids").map_err(StorageError::from)? as u32,
        unique_bidders: row
            .try_get::<i64, _>("unique_bidders")
            .map_err(StorageError::from)? as u32,
        created_at: row.try_get("created_at").map_err(StorageError::from)?,
    })
}

fn bid_from_row(row: &SqliteRow) -> StoreResult<Bid> {
    let source: String = row.try_get("source").map_err(StorageError::from)?;
    Ok(Bid {
        id: row.try_get("id").map_err(StorageError::from)?,
        auction_id: row.try_get("auction_id").map_err(StorageError::from)?,
        bidder_id: row.try_get("bidder_id").map_err(StorageError::from)?,
        bidder_name: row.try_get("bidder_name").map_err(StorageError::from)?,
        amount: from_cents(row.try_get("amount_cents").map_err(StorageError::from)?),
        source: parse_source(&source)?,
        external_comment_id: row
            .try_get("external_comment_id")
            .map_err(StorageError::from)?,
        valid: row.try_get("valid").map_err(StorageError::from)?,
        winning: row.try_get("winning").map_err(StorageError::from)?,
        created_at: row.try_get("created_at").map_err(StorageError::from)?,
    })
}

fn bidder_from_row(row: &SqliteRow) -> StoreResult<Bidder> {
    Ok(Bidder {
        id: row.try_get("id").map_err(StorageError::from)?,
        display_name: row.try_get("display_name").map_err(StorageError::from)?,
        external_id: row.try_get("external_id").map_err(StorageError::from)?,
        is_active: row.try_get("is_active").map_err(StorageError::from)?,
        created_at: row.try_get("created_at").map_err(StorageError::from)?,
    })
}

#[async_trait]
impl Repository for SqliteStore {
    async fn get_auction(&self, id: &str) -> StoreResult<Option<Auction>> {
        let row = sqlx::query("SELECT * FROM auctions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(auction_from_row).transpose()
    }

    async fn list_active_auctions(&self) -> StoreResult<Vec<Auction>> {
        let rows = sqlx::query("SELECT * FROM auctions WHERE status = 'active' ORDER BY end_time")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(auction_from_row).collect()
    }

    async fn insert_auction(&self, a: &Auction) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO auctions (id, title, description, starting_bid_cents, \
             bid_increment_cents, current_bid_cents, reserve_price_cents, \
             buy_now_price_cents, end_time, status, auto_extend, extension_minutes, \
             external_post_id, winner_bidder_id, total_bids, unique_bidders, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&a.id)
        .bind(&a.title)
        .bind(&a.description)
        .bind(to_cents(a.starting_bid))
        .bind(to_cents(a.bid_increment))
        .bind(to_cents(a.current_bid))
        .bind(a.reserve_price.map(to_cents))
        .bind(a.buy_now_price.map(to_cents))
        .bind(a.end_time)
        .bind(status_str(a.status))
        .bind(a.auto_extend)
        .bind(a.extension_minutes)
        .bind(&a.external_post_id)
        .bind(&a.winner_bidder_id)
        .bind(a.total_bids as i64)
        .bind(a.unique_bidders as i64)
        .bind(a.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_auction(&self, a: &Auction) -> StoreResult<()> {
        sqlx::query(
            "UPDATE auctions SET title = ?, description = ?, starting_bid_cents = ?, \
             bid_increment_cents = ?, current_bid_cents = ?, reserve_price_cents = ?, \
             buy_now_price_cents = ?, end_time = ?, status = ?, auto_extend = ?, \
             extension_minutes = ?, external_post_id = ?, winner_bidder_id = ?, \
             total_bids = ?, unique_bidders = ? WHERE id = ?",
        )
        .bind(&a.title)
        .bind(&a.description)
        .bind(to_cents(a.starting_bid))
        .bind(to_cents(a.bid_increment))
        .bind(to_cents(a.current_bid))
        .bind(a.reserve_price.map(to_cents))
        .bind(a.buy_now_price.map(to_cents))
        .bind(a.end_time)
        .bind(status_str(a.status))
        .bind(a.auto_extend)
        .bind(a.extension_minutes)
        .bind(&a.external_post_id)
        .bind(&a.winner_bidder_id)
        .bind(a.total_bids as i64)
        .bind(a.unique_bidders as i64)
        .bind(&a.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_bid(&self, b: &Bid) -> StoreResult<()> {
        // The partial unique index on external_comment_id makes the
        // duplicate check atomic with the insert.
        sqlx::query(
            "INSERT INTO bids (id, auction_id, bidder_id, bidder_name, amount_cents, \
             source, external_comment_id, valid, winning, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&b.id)
        .bind(&b.auction_id)
        .bind(&b.bidder_id)
        .bind(&b.bidder_name)
        .bind(to_cents(b.amount))
        .bind(source_str(b.source))
        .bind(&b.external_comment_id)
        .bind(b.valid)
        .bind(b.winning)
        .bind(b.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_bid(&self, b: &Bid) -> StoreResult<()> {
        sqlx::query("UPDATE bids SET amount_cents = ?, valid = ?, winning = ? WHERE id = ?")
            .bind(to_cents(b.amount))
            .bind(b.valid)
            .bind(b.winning)
            .bind(&b.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_bids(&self, auction_id: &str, order: BidOrder) -> StoreResult<Vec<Bid>> {
        let sql = match order {
            BidOrder::AmountDesc => {
                "SELECT * FROM bids WHERE auction_id = ? \
                 ORDER BY amount_cents DESC, created_at ASC"
            }
            BidOrder::CreatedAsc => "SELECT * FROM bids WHERE auction_id = ? ORDER BY created_at ASC",
        };
        let rows = sqlx::query(sql).bind(auction_id).fetch_all(&self.pool).await?;
        rows.iter().map(bid_from_row).collect()
    }

    async fn find_bid_by_comment(&self, external_comment_id: &str) -> StoreResult<Option<Bid>> {
        let row = sqlx::query("SELECT * FROM bids WHERE external_comment_id = ?")
            .bind(external_comment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bid_from_row).transpose()
    }

    async fn highest_valid_bid(&self, auction_id: &str) -> StoreResult<Option<Bid>> {
        let row = sqlx::query(
            "SELECT * FROM bids WHERE auction_id = ? AND valid = 1 \
             ORDER BY amount_cents DESC, created_at ASC LIMIT 1",
        )
        .bind(auction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(bid_from_row).transpose()
    }

    async fn distinct_bidders(&self, auction_id: &str) -> StoreResult<u32> {
        let row = sqlx::query("SELECT COUNT(DISTINCT bidder_id) AS n FROM bids WHERE auction_id = ?")
            .bind(auction_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n").map_err(StorageError::from)?;
        Ok(n as u32)
    }

    async fn mark_winning(&self, auction_id: &str, bid_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        sqlx::query("UPDATE bids SET winning = 0 WHERE auction_id = ? AND id != ?")
            .bind(auction_id)
            .bind(bid_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE bids SET winning = 1 WHERE id = ?")
            .bind(bid_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_bidder(&self, id: &str) -> StoreResult<Option<Bidder>> {
        let row = sqlx::query("SELECT * FROM bidders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bidder_from_row).transpose()
    }

    async fn find_bidder_by_external(&self, external_id: &str) -> StoreResult<Option<Bidder>> {
        let row = sqlx::query("SELECT * FROM bidders WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bidder_from_row).transpose()
    }

    async fn find_bidder_by_name(&self, display_name: &str) -> StoreResult<Option<Bidder>> {
        let row = sqlx::query("SELECT * FROM bidders WHERE display_name = ? LIMIT 1")
            .bind(display_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bidder_from_row).transpose()
    }

    async fn insert_bidder(&self, b: &Bidder) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO bidders (id, display_name, external_id, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&b.id)
        .bind(&b.display_name)
        .bind(&b.external_id)
        .bind(b.is_active)
        .bind(b.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
