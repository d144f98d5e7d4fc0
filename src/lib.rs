//! Comment-driven live auction engine.
//!
//! Bids arrive as free-text comments on a social platform post (plus an
//! operator entry surface), get parsed into amounts, and run through a
//! per-auction acceptance state machine with soft-close extension,
//! countdown warnings and broadcast fan-out.
//!
//! ```text
//! Webhook / Poll / Websocket → Parser → Engine → Storage
//!                                         ↓
//!                                   Broadcast Hub → subscribers
//!                                         ↑
//!                       Monitor (countdown, warnings, finalize)
//! ```

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod hub;
pub mod monitor;
pub mod parser;
pub mod platform;
pub mod server;
pub mod storage;
pub mod types;
