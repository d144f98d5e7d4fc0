use super::*;
use crate::engine::AuctionLocks;
use crate::hub::BroadcastHub;
use crate::monitor::AuctionMonitor;
use crate::platform::MockCommentSource;
use crate::storage::MemoryStore;
use crate::types::Bidder;
use axum::response::IntoResponse;
use chrono::Duration as ChronoDuration;
use rust_decimal_macros::dec;

struct TestApp {
    repo: Arc<MemoryStore>,
    state: Arc<AppState>,
}

fn app_with(source: MockCommentSource) -> TestApp {
    app_with_source(Arc::new(source), Duration::from_secs(5))
}

fn app_with_source(source: Arc<dyn CommentSource>, webhook_entry_budget: Duration) -> TestApp {
    let repo = Arc::new(MemoryStore::new());
    let dyn_repo = Arc::clone(&repo) as Arc<dyn Repository>;
    let hub = Arc::new(BroadcastHub::new(32));
    let engine = Arc::new(BidEngine::new(
        Arc::clone(&dyn_repo),
        Arc::clone(&hub),
        Arc::new(AuctionLocks::new()),
    ));
    let directory = BidderDirectory::new(Arc::clone(&dyn_repo));
    let ingestor = Arc::new(CommentIngestor::new(
        Arc::clone(&engine),
        directory.clone(),
        Arc::clone(&source),
    ));
    let (monitor, handle) = AuctionMonitor::new(
        Arc::clone(&dyn_repo),
        Arc::clone(&engine),
        Arc::clone(&ingestor),
        Arc::clone(&source),
        Arc::clone(&hub),
        crate::config::MonitorConfig::default(),
        false,
    );
    tokio::spawn(monitor.run());

    let state = Arc::new(AppState {
        repo: dyn_repo,
        engine,
        ingestor,
        directory,
        hub,
        monitor: handle,
        source,
        verify_token: "secret-token".to_string(),
        webhook_entry_budget,
    });
    TestApp { repo, state }
}

fn app() -> TestApp {
    let mut source = MockCommentSource::new();
    source.expect_reply_to_comment().return_const(());
    app_with(source)
}

/// Confirmation replies hang forever, pinning an entry past its budget.
struct StallingSource;

#[async_trait::async_trait]
impl CommentSource for StallingSource {
    async fn fetch_comments_since(
        &self,
        _post_id: &str,
        cursor: chrono::DateTime<Utc>,
    ) -> crate::error::Result<(Vec<Comment>, chrono::DateTime<Utc>)> {
        Ok((Vec::new(), cursor))
    }

    async fn reply_to_comment(&self, _comment_id: &str, _text: &str) {
        std::future::pending::<()>().await;
    }
}

async fn seed_auction(repo: &MemoryStore, id: &str, post_id: &str) -> Auction {
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
        end_time: now + ChronoDuration::hours(1),
        status: AuctionStatus::Active,
        auto_extend: true,
        extension_minutes: 5,
        external_post_id: Some(post_id.to_string()),
        winner_bidder_id: None,
        total_bids: 0,
        unique_bidders: 0,
        created_at: now,
    };
    repo.insert_auction(&auction).await.unwrap();
    auction
}

fn feed_envelope(verb: &str, comment_id: &str, post_id: &str, message: Option<&str>) -> WebhookEnvelope {
    serde_json::from_value(serde_json::json!({
        "object": "page",
        "entry": [{
            "changes": [{
                "field": "feed",
                "value": {
                    "verb": verb,
                    "item": "comment",
                    "comment_id": comment_id,
                    "post_id": post_id,
                    "message": message,
                    "from": { "id": "ext-1", "name": "Alice" }
                }
            }]
        }]
    }))
    .unwrap()
}

fn query(pairs: &[(&str, &str)]) -> Query<HashMap<String, String>> {
    Query(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

#[tokio::test]
async fn webhook_verification_echoes_the_challenge() {
    let app = app();
    let response = verify_webhook(
        State(Arc::clone(&app.state)),
        query(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "secret-token"),
            ("hub.challenge", "challenge-42"),
        ]),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"challenge-42");
}

#[tokio::test]
async fn webhook_verification_rejects_a_bad_token() {
    let app = app();
    let response = verify_webhook(
        State(Arc::clone(&app.state)),
        query(&[
            ("hub.mode", "subscribe"),
            ("hub.verify_token", "wrong"),
            ("hub.challenge", "challenge-42"),
        ]),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_verification_requires_all_parameters() {
    let app = app();
    let response = verify_webhook(
        State(Arc::clone(&app.state)),
        query(&[("hub.mode", "subscribe")]),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_comment_add_places_a_bid() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    let response = receive_webhook(
        State(Arc::clone(&app.state)),
        Json(feed_envelope("add", "c-1", "p-1", Some("$25"))),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.current_bid, dec!(25));
    assert_eq!(auction.total_bids, 1);
}

#[tokio::test]
async fn webhook_for_unwatched_post_is_acknowledged_and_ignored() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    let response = receive_webhook(
        State(Arc::clone(&app.state)),
        Json(feed_envelope("add", "c-1", "p-other", Some("$25"))),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.total_bids, 0);
}

#[tokio::test]
async fn webhook_edit_of_unseen_comment_falls_back_to_add() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    receive_webhook(
        State(Arc::clone(&app.state)),
        Json(feed_envelope("edited", "c-1", "p-1", Some("$25"))),
    )
    .await;

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.current_bid, dec!(25));
}

#[tokio::test]
async fn webhook_remove_invalidates_the_bid() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    receive_webhook(
        State(Arc::clone(&app.state)),
        Json(feed_envelope("add", "c-1", "p-1", Some("$25"))),
    )
    .await;
    receive_webhook(
        State(Arc::clone(&app.state)),
        Json(feed_envelope("remove", "c-1", "p-1", None)),
    )
    .await;

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.current_bid, dec!(10));
    assert!(app.repo.highest_valid_bid("a1").await.unwrap().is_none());
}

#[tokio::test]
async fn webhook_entry_budget_abandons_remaining_entries() {
    let app = app_with_source(Arc::new(StallingSource), Duration::from_millis(50));
    seed_auction(&app.repo, "a1", "p-1").await;

    // Two entries. The confirmation reply for the first never returns,
    // so its entry blows the budget and the second must be dropped.
    let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
        "object": "page",
        "entry": [
            { "changes": [{ "field": "feed", "value": {
                "verb": "add", "item": "comment",
                "comment_id": "c-1", "post_id": "p-1", "message": "$25",
                "from": { "id": "ext-1", "name": "Alice" }
            } }] },
            { "changes": [{ "field": "feed", "value": {
                "verb": "add", "item": "comment",
                "comment_id": "c-2", "post_id": "p-1", "message": "$30",
                "from": { "id": "ext-2", "name": "Bob" }
            } }] }
        ]
    }))
    .unwrap();

    let response = receive_webhook(State(Arc::clone(&app.state)), Json(envelope))
        .await
        .into_response();
    // Still a 200; the platform redelivers what we dropped.
    assert_eq!(response.status(), StatusCode::OK);

    // The first bid landed before its reply stalled; the second entry
    // was never processed.
    assert!(app.repo.find_bid_by_comment("c-1").await.unwrap().is_some());
    assert!(app.repo.find_bid_by_comment("c-2").await.unwrap().is_none());
}

#[tokio::test]
async fn non_page_webhook_is_acknowledged() {
    let app = app();
    let envelope: WebhookEnvelope =
        serde_json::from_value(serde_json::json!({ "object": "user" })).unwrap();
    let response = receive_webhook(State(Arc::clone(&app.state)), Json(envelope))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn operator_bid_is_created_with_a_fresh_bidder() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    let response = operator_bid(
        State(Arc::clone(&app.state)),
        Json(OperatorBidRequest {
            auction_id: "a1".to_string(),
            bidder_name: "Walk-in".to_string(),
            amount: dec!(15),
            source: None,
        }),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.current_bid, dec!(15));
    let bidder = app.repo.find_bidder_by_name("Walk-in").await.unwrap().unwrap();
    assert!(bidder.external_id.is_none());
}

#[tokio::test]
async fn operator_bid_below_minimum_is_a_bad_request() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    let response = operator_bid(
        State(Arc::clone(&app.state)),
        Json(OperatorBidRequest {
            auction_id: "a1".to_string(),
            bidder_name: "Walk-in".to_string(),
            amount: dec!(5),
            source: None,
        }),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["kind"], "below-minimum");
}

#[tokio::test]
async fn operator_bid_rejects_platform_sources() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    let response = operator_bid(
        State(Arc::clone(&app.state)),
        Json(OperatorBidRequest {
            auction_id: "a1".to_string(),
            bidder_name: "Walk-in".to_string(),
            amount: dec!(15),
            source: Some(BidSource::ExternalComment),
        }),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn operator_bid_reuses_a_known_bidder() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;
    app.repo
        .insert_bidder(&Bidder {
            id: "u1".to_string(),
            display_name: "Walk-in".to_string(),
            external_id: None,
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    operator_bid(
        State(Arc::clone(&app.state)),
        Json(OperatorBidRequest {
            auction_id: "a1".to_string(),
            bidder_name: "Walk-in".to_string(),
            amount: dec!(15),
            source: None,
        }),
    )
    .await;

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.winner_bidder_id.as_deref(), Some("u1"));
}

#[tokio::test]
async fn auction_lookup_returns_404_for_unknown_ids() {
    let app = app();
    let response = get_auction(State(Arc::clone(&app.state)), Path("nope".to_string()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_flips_an_active_auction() {
    let app = app();
    seed_auction(&app.repo, "a1", "p-1").await;

    let response = cancel_auction(State(Arc::clone(&app.state)), Path("a1".to_string()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let auction = app.repo.get_auction("a1").await.unwrap().unwrap();
    assert_eq!(auction.status, AuctionStatus::Cancelled);

    // Cancelling again is a 404.
    let response = cancel_auction(State(Arc::clone(&app.state)), Path("a1".to_string()))
        .await
        .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
