//! Backend data types and error taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Identifier assigned to every dispatched symbol lookup
pub type RequestId = u64;

/// Identifier assigned to every stream start request
pub type SessionId = u64;

/// One OHLC price observation for a fixed instant
///
/// `time` is Unix epoch seconds and is the ordering key of a chart series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    /// Create a bar without volume information
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    /// Attach a traded volume to the bar
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Channel a backend pushes bars into for one live feed.
/// The feed is over once the backend drops its sender.
pub type BarSink = mpsc::UnboundedSender<Bar>;

/// Opaque backend identifier of a live feed, only used to stop it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamToken(String);

impl StreamToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A market order handed to the backend as a single call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub quantity: f64,
    pub side: Side,
}

/// Backend acknowledgment of an accepted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub side: Side,
    pub status: String,
}

/// Error types for symbol lookups
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("Symbol lookup transport error: {0}")]
    Transport(String),
    #[error("Symbol lookup rejected by backend: {0}")]
    Backend(String),
    #[error("Symbol lookup timed out after {0}ms")]
    Timeout(u64),
}

/// Error types for stream start requests
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamStartError {
    #[error("Stream transport error: {0}")]
    Transport(String),
    #[error("Stream for {symbol} rejected: {reason}")]
    Rejected { symbol: String, reason: String },
    #[error("Stream start not acknowledged within {0}ms")]
    Timeout(u64),
}

/// Error types for order placement
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("No symbol selected")]
    NoSymbolSelected,
    #[error("Invalid order quantity: {0}")]
    InvalidQuantity(f64),
    #[error("Order transport error: {0}")]
    Transport(String),
    #[error("Order rejected: {0}")]
    Rejected(String),
}
