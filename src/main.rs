//! Live auction engine for comment-driven bidding.

use auction_bot::{
    config::Config,
    directory::BidderDirectory,
    engine::{AuctionLocks, BidEngine, CommentIngestor},
    hub::BroadcastHub,
    monitor::AuctionMonitor,
    parser::parse_bid_amount,
    platform::{CommentSource, GraphClient},
    server::{self, AppState},
    storage::{Repository, SqliteStore},
    types::{Auction, AuctionStatus},
};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "auction-bot")]
#[command(about = "Comment-driven live auction engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server and auction monitor
    Serve,
    /// Parse a comment and print the extracted bid amount
    Parse {
        /// Comment text to parse
        text: String,
    },
    /// Create an active auction
    Seed {
        /// Auction title
        title: String,
        /// Starting bid in dollars
        #[arg(long, default_value = "1")]
        starting_bid: Decimal,
        /// Minimum raise over the current bid
        #[arg(long, default_value = "1")]
        increment: Decimal,
        /// Minutes until the auction ends
        #[arg(long, default_value = "60")]
        minutes: i64,
        /// Platform post to watch for comment bids
        #[arg(long)]
        post_id: Option<String>,
        /// Buy-now amount that ends the auction immediately
        #[arg(long)]
        buy_now: Option<Decimal>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Parse { text } => {
            match parse_bid_amount(&text) {
                Some(amount) => println!("${amount:.2}"),
                None => println!("no bid found"),
            }
            Ok(())
        }
        Commands::Seed {
            title,
            starting_bid,
            increment,
            minutes,
            post_id,
            buy_now,
        } => seed(config, title, starting_bid, increment, minutes, post_id, buy_now).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting auction engine");

    let repo: Arc<dyn Repository> = Arc::new(SqliteStore::connect(&config.database.url).await?);

    let graph = GraphClient::new(config.platform.clone())?;
    let poll_comments = graph.enabled();
    if !poll_comments {
        tracing::warn!("Platform polling disabled (manual mode or no access token)");
    }
    let source: Arc<dyn CommentSource> = Arc::new(graph);

    let hub = Arc::new(BroadcastHub::new(config.hub.channel_capacity));
    let locks = Arc::new(AuctionLocks::new());
    let engine = Arc::new(BidEngine::new(Arc::clone(&repo), Arc::clone(&hub), locks));
    let directory = BidderDirectory::new(Arc::clone(&repo));
    let ingestor = Arc::new(CommentIngestor::new(
        Arc::clone(&engine),
        directory.clone(),
        Arc::clone(&source),
    ));

    let (monitor, handle) = AuctionMonitor::new(
        Arc::clone(&repo),
        Arc::clone(&engine),
        Arc::clone(&ingestor),
        Arc::clone(&source),
        Arc::clone(&hub),
        config.monitor.clone(),
        poll_comments,
    );
    tokio::spawn(monitor.run());

    let state = Arc::new(AppState {
        repo,
        engine,
        ingestor,
        directory,
        hub,
        monitor: handle,
        source,
        verify_token: config.platform.verify_token.clone(),
        webhook_entry_budget: Duration::from_secs(5),
    });

    server::serve(state, &config.server.bind, config.server.port).await
}

async fn seed(
    config: Config,
    title: String,
    starting_bid: Decimal,
    increment: Decimal,
    minutes: i64,
    post_id: Option<String>,
    buy_now: Option<Decimal>,
) -> anyhow::Result<()> {
    let repo = SqliteStore::connect(&config.database.url).await?;
    let now = Utc::now();

    let auction = Auction {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        description: String::new(),
        starting_bid,
        bid_increment: increment,
        current_bid: starting_bid,
        reserve_price: None,
        buy_now_price: buy_now,
        end_time: now + ChronoDuration::minutes(minutes),
        status: AuctionStatus::Active,
        auto_extend: true,
        extension_minutes: config.monitor.soft_close_default_minutes,
        external_post_id: post_id,
        winner_bidder_id: None,
        total_bids: 0,
        unique_bidders: 0,
        created_at: now,
    };

    repo.insert_auction(&auction).await?;
    println!("Created auction {} ending {}", auction.id, auction.end_time);
    Ok(())
}
