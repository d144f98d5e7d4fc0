use super::*;
use crate::directory::BidderDirectory;
use crate::engine::AuctionLocks;
use crate::error::EngineError;
use crate::hub::AuctionEvent;
use crate::platform::{Comment, MockCommentSource};
use crate::storage::MemoryStore;
use crate::types::{Auction, Bidder};
use chrono::Duration as ChronoDuration;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

struct Fixture {
    repo: Arc<MemoryStore>,
    hub: Arc<BroadcastHub>,
    monitor: AuctionMonitor,
    #[allow(dead_code)]
    handle: MonitorHandle,
}

fn fixture(source: MockCommentSource, poll_comments: bool) -> Fixture {
    let repo = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::new(32));
    let dyn_repo = Arc::clone(&repo) as Arc<dyn Repository>;
    let engine = Arc::new(BidEngine::new(
        Arc::clone(&dyn_repo),
        Arc::clone(&hub),
        Arc::new(AuctionLocks::new()),
    ));
    let source: Arc<dyn CommentSource> = Arc::new(source);
    let ingestor = Arc::new(CommentIngestor::new(
        Arc::clone(&engine),
        BidderDirectory::new(Arc::clone(&dyn_repo)),
        Arc::clone(&source),
    ));
    let (monitor, handle) = AuctionMonitor::new(
        dyn_repo,
        engine,
        ingestor,
        source,
        Arc::clone(&hub),
        MonitorConfig::default(),
        poll_comments,
    );
    Fixture {
        repo,
        hub,
        monitor,
        handle,
    }
}

fn quiet_source() -> MockCommentSource {
    let mut source = MockCommentSource::new();
    source
        .expect_fetch_comments_since()
        .returning(|_, cursor| Ok((Vec::new(), cursor)));
    source.expect_reply_to_comment().return_const(());
    source
}

async fn seed_auction(repo: &MemoryStore, id: &str, ends_in: ChronoDuration) -> Auction {
    let now = Utc::now();
    let auction = Auction {
        id: id.to_string(),
        title: format!("Auction {id}"),
        description: String::new(),
        starting_bid: dec!(10),
        bid_increment: dec!(1),
        current_bid: dec!(10),
        reserve_price: None,
        buy_now_price: None,
        end_time: now + ends_in,
        status: AuctionStatus::Active,
        auto_extend: true,
        extension_minutes: 5,
        external_post_id: Some(format!("post-{id}")),
        winner_bidder_id: None,
        total_bids: 0,
        unique_bidders: 0,
        created_at: now,
    };
    repo.insert_auction(&auction).await.unwrap();
    auction
}

async fn seed_bidder(repo: &MemoryStore, id: &str) {
    repo.insert_bidder(&Bidder {
        id: id.to_string(),
        display_name: id.to_string(),
        external_id: Some(format!("ext-{id}")),
        is_active: true,
        created_at: Utc::now(),
    })
    .await
    .unwrap();
}

fn drain(rx: &mut broadcast::Receiver<AuctionEvent>) -> Vec<AuctionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn startup_adopts_active_auctions() {
    let mut fx = fixture(quiet_source(), false);
    seed_auction(&fx.repo, "a1", ChronoDuration::hours(1)).await;
    seed_auction(&fx.repo, "a2", ChronoDuration::hours(2)).await;

    fx.monitor.adopt_active_auctions().await.unwrap();
    assert_eq!(fx.monitor.table.len(), 2);
}

#[tokio::test]
async fn register_skips_non_active_auctions() {
    let mut fx = fixture(quiet_source(), false);
    let mut auction = seed_auction(&fx.repo, "a1", ChronoDuration::hours(1)).await;
    auction.status = AuctionStatus::Ended;
    fx.repo.save_auction(&auction).await.unwrap();

    fx.monitor.register("a1").await;
    fx.monitor.register("ghost").await;
    assert!(fx.monitor.table.is_empty());
}

#[tokio::test]
async fn expired_auction_is_finalized_and_dropped() {
    let mut fx = fixture(quiet_source(), false);
    seed_auction(&fx.repo, "a1", ChronoDuration::seconds(-5)).await;
    fx.monitor.adopt_active_auctions().await.unwrap();
    let mut rx = fx.hub.subscribe("a1");

    fx.monitor.tick_all().await;

    assert!(fx.monitor.table.is_empty());
    let auction = fx.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.status, AuctionStatus::Ended);
    assert!(matches!(
        rx.recv().await.unwrap(),
        AuctionEvent::AuctionEnded {
            reason: EndReason::TimeExpired,
            ..
        }
    ));
}

#[tokio::test]
async fn warning_fires_once_per_threshold() {
    let mut fx = fixture(quiet_source(), false);
    // Inside the 5-minute threshold with slack so two ticks both see
    // five whole minutes remaining.
    seed_auction(&fx.repo, "a1", ChronoDuration::minutes(5) + ChronoDuration::seconds(30)).await;
    fx.monitor.adopt_active_auctions().await.unwrap();
    let mut rx = fx.hub.subscribe("a1");

    fx.monitor.tick_all().await;
    fx.monitor.tick_all().await;

    let events = drain(&mut rx);
    let warnings: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, AuctionEvent::TimeWarning { .. }))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        warnings[0],
        AuctionEvent::TimeWarning {
            minutes_remaining: 5,
            ..
        }
    ));
    // Each tick still pushes a countdown update.
    let updates = events
        .iter()
        .filter(|e| matches!(e, AuctionEvent::AuctionUpdate { .. }))
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn warning_ladder_resets_after_extension() {
    let mut fx = fixture(quiet_source(), false);
    let mut auction =
        seed_auction(&fx.repo, "a1", ChronoDuration::minutes(5) + ChronoDuration::seconds(30))
            .await;
    fx.monitor.adopt_active_auctions().await.unwrap();
    let mut rx = fx.hub.subscribe("a1");

    fx.monitor.tick_all().await;

    // A soft-close extension moves the end; the same threshold must be
    // allowed to fire again on the way back down.
    auction.end_time += ChronoDuration::minutes(5);
    fx.repo.save_auction(&auction).await.unwrap();
    fx.monitor.tick_all().await;

    auction.end_time = Utc::now() + ChronoDuration::minutes(5) + ChronoDuration::seconds(30);
    fx.repo.save_auction(&auction).await.unwrap();
    fx.monitor.tick_all().await;

    let warnings = drain(&mut rx)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                AuctionEvent::TimeWarning {
                    minutes_remaining: 5,
                    ..
                }
            )
        })
        .count();
    assert_eq!(warnings, 2);
}

#[tokio::test]
async fn polled_comments_become_bids_and_advance_the_cursor() {
    let mut source = MockCommentSource::new();
    let comment_time = Utc::now();
    source
        .expect_fetch_comments_since()
        .times(1)
        .returning(move |_, _| {
            Ok((
                vec![Comment {
                    external_comment_id: "c-1".to_string(),
                    external_author_id: "ext-u1".to_string(),
                    author_display_name: "u1".to_string(),
                    text: "$25".to_string(),
                    created_at: comment_time,
                }],
                comment_time,
            ))
        });
    // Second tick must resume from the advanced cursor.
    source
        .expect_fetch_comments_since()
        .withf(move |_, cursor| *cursor == comment_time)
        .times(1)
        .returning(|_, cursor| Ok((Vec::new(), cursor)));
    source.expect_reply_to_comment().return_const(());

    let mut fx = fixture(source, true);
    seed_auction(&fx.repo, "a1", ChronoDuration::hours(1)).await;
    seed_bidder(&fx.repo, "u1").await;
    fx.monitor.adopt_active_auctions().await.unwrap();

    fx.monitor.tick_all().await;
    fx.monitor.tick_all().await;

    let auction = fx.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.current_bid, dec!(25));
    assert_eq!(auction.total_bids, 1);
}

#[tokio::test]
async fn fetch_failure_leaves_the_cursor_in_place() {
    let mut source = MockCommentSource::new();
    let mut cursors: Vec<DateTime<Utc>> = Vec::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    source
        .expect_fetch_comments_since()
        .times(1)
        .returning(move |_, cursor| {
            seen_clone.lock().push(cursor);
            Err(EngineError::Internal("network down".to_string()))
        });
    let seen_clone = Arc::clone(&seen);
    source
        .expect_fetch_comments_since()
        .times(1)
        .returning(move |_, cursor| {
            seen_clone.lock().push(cursor);
            Ok((Vec::new(), cursor))
        });
    source.expect_reply_to_comment().return_const(());

    let mut fx = fixture(source, true);
    seed_auction(&fx.repo, "a1", ChronoDuration::hours(1)).await;
    fx.monitor.adopt_active_auctions().await.unwrap();

    fx.monitor.tick_all().await;
    fx.monitor.tick_all().await;

    cursors.extend(seen.lock().iter().copied());
    assert_eq!(cursors.len(), 2);
    // The failed fetch did not move the cursor.
    assert_eq!(cursors[0], cursors[1]);
}

#[tokio::test]
async fn backup_sweep_ends_expired_auctions() {
    let mut fx = fixture(quiet_source(), false);
    seed_auction(&fx.repo, "stale", ChronoDuration::seconds(-30)).await;
    seed_auction(&fx.repo, "live", ChronoDuration::hours(1)).await;

    fx.monitor.backup_sweep().await;

    let stale = fx.repo.get_auction("stale").await.unwrap().unwrap();
    assert_eq!(stale.status, AuctionStatus::Ended);
    let live = fx.repo.get_auction("live").await.unwrap().unwrap();
    assert_eq!(live.status, AuctionStatus::Active);
}

#[tokio::test]
async fn backup_sweep_adopts_auctions_created_after_startup() {
    let mut fx = fixture(quiet_source(), false);
    fx.monitor.adopt_active_auctions().await.unwrap();
    assert!(fx.monitor.table.is_empty());

    // Seeded out of band while the loop is already running; the sweep
    // must pick it up so it gets ticks and warnings, not just a
    // post-mortem finalize.
    seed_auction(&fx.repo, "late", ChronoDuration::hours(1)).await;
    let mut ended = seed_auction(&fx.repo, "done", ChronoDuration::hours(1)).await;
    ended.status = AuctionStatus::Ended;
    fx.repo.save_auction(&ended).await.unwrap();

    fx.monitor.backup_sweep().await;

    assert!(fx.monitor.table.contains_key("late"));
    assert!(!fx.monitor.table.contains_key("done"));
}

#[tokio::test]
async fn manual_mode_never_polls_the_platform() {
    let mut source = MockCommentSource::new();
    source.expect_fetch_comments_since().times(0);
    source.expect_reply_to_comment().return_const(());

    let mut fx = fixture(source, false);
    seed_auction(&fx.repo, "a1", ChronoDuration::hours(1)).await;
    fx.monitor.adopt_active_auctions().await.unwrap();

    fx.monitor.tick_all().await;
}
