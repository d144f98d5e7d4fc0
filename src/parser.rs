//! Bid extraction from free-form comment text.
//!
//! Deterministic and side-effect-free. Patterns are tried in priority
//! order; within a pattern the first match wins. Comma-grouped numbers
//! (`1,000`) are deliberately not recognized to avoid locale ambiguity,
//! and amounts with more than two fractional digits are rejected rather
//! than rounded.

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

/// Recognized bid shapes, highest priority first:
/// `$25` / `$25.50`, `25 dollars`, `bid: $25` / `bid 25`,
/// a bare number constituting the whole input, `25$`.
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\$(\d[\d,]*(?:\.\d+)?)").unwrap(),
        Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*dollars?").unwrap(),
        Regex::new(r"(?i)bid\s*:?\s*\$?(\d[\d,]*(?:\.\d+)?)").unwrap(),
        Regex::new(r"^(\d+(?:\.\d+)?)$").unwrap(),
        Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*\$").unwrap(),
    ]
});

/// Extract a monetary amount from comment text, if any.
pub fn parse_bid_amount(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.captures(trimmed) {
            if let Some(amount) = validate(caps.get(1)?.as_str()) {
                return Some(amount);
            }
        }
    }

    None
}

/// A matched number token is only a bid when it is comma-free, carries
/// at most two fractional digits, and is strictly positive.
fn validate(token: &str) -> Option<Decimal> {
    if token.contains(',') {
        return None;
    }
    if let Some((_, frac)) = token.split_once('.') {
        if frac.len() > 2 {
            return None;
        }
    }
    let amount = Decimal::from_str(token).ok()?;
    if amount > Decimal::ZERO {
        Some(amount)
    } else {
        None
    }
}
