//! Per-auction monitoring loop.
//!
//! One task owns the registration table and drives every monitored
//! auction: expiry, the time-warning ladder, the comment poll and the
//! periodic `auction-update` push. Ingress paths register and
//! deregister auctions by message; nothing else touches the table.
//! A backup sweep finalizes expirations a wedged tick might miss and
//! adopts active auctions that never went through registration.

#[cfg(test)]
mod tests;

use crate::config::MonitorConfig;
use crate::engine::{BidEngine, CommentIngestor};
use crate::hub::{AuctionEvent, BroadcastHub};
use crate::platform::CommentSource;
use crate::storage::Repository;
use crate::types::{AuctionStatus, EndReason};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Warning marks, in minutes before end.
const WARNING_MINUTES: [i64; 5] = [60, 30, 15, 5, 1];

#[derive(Debug)]
pub enum MonitorCommand {
    Register(String),
    Deregister(String),
}

#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    pub async fn register(&self, auction_id: &str) {
        if self
            .tx
            .send(MonitorCommand::Register(auction_id.to_string()))
            .await
            .is_err()
        {
            tracing::warn!("Monitor is gone; cannot register {}", auction_id);
        }
    }

    pub async fn deregister(&self, auction_id: &str) {
        let _ = self
            .tx
            .send(MonitorCommand::Deregister(auction_id.to_string()))
            .await;
    }
}

/// Tick bookkeeping for one monitored auction.
struct TickState {
    /// Comments at or before this instant were already processed.
    /// Advanced only after a successful fetch, so a failed poll never
    /// loses bids.
    cursor: DateTime<Utc>,
    /// Warning marks already fired for `warned_end_time`.
    warned: HashSet<i64>,
    /// Soft close moves `end_time`; the ladder resets with it.
    warned_end_time: DateTime<Utc>,
}

pub struct AuctionMonitor {
    repo: Arc<dyn Repository>,
    engine: Arc<BidEngine>,
    ingestor: Arc<CommentIngestor>,
    source: Arc<dyn CommentSource>,
    hub: Arc<BroadcastHub>,
    config: MonitorConfig,
    /// Comment polling is disabled in manual integration mode.
    poll_comments: bool,
    rx: mpsc::Receiver<MonitorCommand>,
    table: HashMap<String, TickState>,
}

impl AuctionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn Repository>,
        engine: Arc<BidEngine>,
        ingestor: Arc<CommentIngestor>,
        source: Arc<dyn CommentSource>,
        hub: Arc<BroadcastHub>,
        config: MonitorConfig,
        poll_comments: bool,
    ) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                repo,
                engine,
                ingestor,
                source,
                hub,
                config,
                poll_comments,
                rx,
                table: HashMap::new(),
            },
            MonitorHandle { tx },
        )
    }

    /// Run until the command channel closes. Every per-auction failure
    /// is logged and absorbed; the monitor never dies of one tick.
    pub async fn run(mut self) {
        if let Err(e) = self.adopt_active_auctions().await {
            tracing::error!("Could not load active auctions at startup: {}", e);
        }
        tracing::info!("Monitoring {} active auctions", self.table.len());

        let mut tick = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sweep =
            tokio::time::interval(Duration::from_secs(self.config.backup_sweep_minutes * 60));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(MonitorCommand::Register(id)) => self.register(&id).await,
                        Some(MonitorCommand::Deregister(id)) => {
                            self.table.remove(&id);
                            tracing::info!("Stopped monitoring auction {}", id);
                        }
                        None => {
                            tracing::info!("Monitor command channel closed; shutting down");
                            return;
                        }
                    }
                }
                _ = tick.tick() => self.tick_all().await,
                _ = sweep.tick() => self.backup_sweep().await,
            }
        }
    }

    async fn adopt_active_auctions(&mut self) -> crate::error::Result<()> {
        for auction in self.repo.list_active_auctions().await? {
            self.table.insert(
                auction.id.clone(),
                TickState {
                    cursor: auction.created_at,
                    warned: HashSet::new(),
                    warned_end_time: auction.end_time,
                },
            );
        }
        Ok(())
    }

    async fn register(&mut self, auction_id: &str) {
        match self.repo.get_auction(auction_id).await {
            Ok(Some(auction)) if auction.status == AuctionStatus::Active => {
                self.table.insert(
                    auction.id.clone(),
                    TickState {
                        cursor: auction.created_at,
                        warned: HashSet::new(),
                        warned_end_time: auction.end_time,
                    },
                );
                tracing::info!("Monitoring auction {} ({})", auction.title, auction.id);
            }
            Ok(_) => tracing::warn!("Not registering {}: not an active auction", auction_id),
            Err(e) => tracing::error!("Register lookup failed for {}: {}", auction_id, e),
        }
    }

    async fn tick_all(&mut self) {
        let ids: Vec<String> = self.table.keys().cloned().collect();
        for id in ids {
            match self.tick_one(&id).await {
                Ok(keep) => {
                    if !keep {
                        self.table.remove(&id);
                        self.hub.prune();
                    }
                }
                Err(e) => tracing::error!("Tick failed for auction {}: {}", id, e),
            }
        }
    }

    /// One tick for one auction. Returns false when the auction should
    /// leave the table.
    async fn tick_one(&mut self, auction_id: &str) -> crate::error::Result<bool> {
        let Some(auction) = self.repo.get_auction(auction_id).await? else {
            return Ok(false);
        };
        if auction.status != AuctionStatus::Active {
            return Ok(false);
        }

        let now = Utc::now();
        if auction.is_expired(now) {
            self.engine.finalize(auction_id, EndReason::TimeExpired).await?;
            return Ok(false);
        }

        let Some(state) = self.table.get_mut(auction_id) else {
            return Ok(false);
        };

        // Soft close moved the end; restart the warning ladder.
        if state.warned_end_time != auction.end_time {
            state.warned.clear();
            state.warned_end_time = auction.end_time;
        }

        let minutes_remaining = (auction.end_time - now).num_minutes();
        if WARNING_MINUTES.contains(&minutes_remaining) && state.warned.insert(minutes_remaining) {
            self.hub.publish(AuctionEvent::TimeWarning {
                auction_id: auction.id.clone(),
                minutes_remaining,
            });
        }

        if self.poll_comments {
            if let Some(post_id) = &auction.external_post_id {
                let cursor = state.cursor;
                match self.source.fetch_comments_since(post_id, cursor).await {
                    Ok((comments, new_cursor)) => {
                        if !comments.is_empty() {
                            tracing::debug!(
                                "Processing {} new comments on post {}",
                                comments.len(),
                                post_id
                            );
                        }
                        for comment in &comments {
                            if let Err(e) = self.ingestor.ingest_comment(auction_id, comment).await
                            {
                                tracing::warn!(
                                    "Comment {} not ingested: {}",
                                    comment.external_comment_id,
                                    e
                                );
                            }
                        }
                        if let Some(state) = self.table.get_mut(auction_id) {
                            state.cursor = new_cursor;
                        }
                    }
                    Err(e) => {
                        // Cursor stays put; these comments return next tick.
                        tracing::warn!("Comment fetch failed for post {}: {}", post_id, e);
                    }
                }
            }
        }

        // Push the fresh state; the poll above may have moved the tip.
        let Some(auction) = self.repo.get_auction(auction_id).await? else {
            return Ok(false);
        };
        if auction.status != AuctionStatus::Active {
            // A buy-now bid can end the auction mid-tick.
            return Ok(false);
        }
        self.hub.publish(AuctionEvent::AuctionUpdate {
            auction_id: auction.id.clone(),
            time_remaining_secs: (auction.end_time - Utc::now()).num_seconds().max(0),
            current_bid: auction.current_bid,
            total_bids: auction.total_bids,
        });
        Ok(true)
    }

    /// Backup for missed expirations, and adoption of active auctions
    /// created out of band (seeded while the loop is running) that
    /// never went through `register`.
    async fn backup_sweep(&mut self) {
        let auctions = match self.repo.list_active_auctions().await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("Backup sweep could not list auctions: {}", e);
                return;
            }
        };
        let now = Utc::now();
        for auction in auctions {
            if auction.is_expired(now) {
                tracing::warn!("Backup sweep ending expired auction {}", auction.id);
                if let Err(e) = self.engine.finalize(&auction.id, EndReason::TimeExpired).await {
                    tracing::error!("Backup finalize failed for {}: {}", auction.id, e);
                }
                self.table.remove(&auction.id);
            } else if !self.table.contains_key(&auction.id) {
                self.register(&auction.id).await;
            }
        }
    }
}
