//! Alpaca API data types and structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::types::{Bar, LookupError, OrderError, Side, StreamStartError};

/// Tradable asset as returned by `GET /v2/assets`
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tradable: bool,
}

/// Body of `POST /v2/orders`
#[derive(Debug, Serialize)]
pub struct OrderPayload<'a> {
    pub symbol: &'a str,
    pub qty: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
}

/// Subset of the order entity returned by the trading API
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub qty: Option<String>,
    pub side: Side,
    pub status: String,
}

/// Error body of the trading API
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<u64>,
    pub message: String,
}

/// Client-to-server frames of the market data stream
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StreamRequest<'a> {
    Auth {
        key: &'a str,
        secret: &'a str,
    },
    Subscribe {
        bars: Vec<String>,
        #[serde(rename = "updatedBars")]
        updated_bars: Vec<String>,
    },
    Unsubscribe {
        bars: Vec<String>,
        #[serde(rename = "updatedBars")]
        updated_bars: Vec<String>,
    },
}

impl StreamRequest<'_> {
    pub fn subscribe(symbol: &str) -> Self {
        StreamRequest::Subscribe {
            bars: vec![symbol.to_string()],
            updated_bars: vec![symbol.to_string()],
        }
    }

    pub fn unsubscribe(symbol: &str) -> Self {
        StreamRequest::Unsubscribe {
            bars: vec![symbol.to_string()],
            updated_bars: vec![symbol.to_string()],
        }
    }
}

/// Server-to-client frames; every text message carries an array of these
#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
pub enum StreamFrame {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error { code: u16, msg: String },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        bars: Vec<String>,
    },
    /// Minute bar
    #[serde(rename = "b")]
    Bar(WireBar),
    /// Late-trade correction of an already published minute bar
    #[serde(rename = "u")]
    UpdatedBar(WireBar),
    #[serde(other)]
    Other,
}

/// Bar payload of the market data stream
#[derive(Debug, Clone, Deserialize)]
pub struct WireBar {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v", default)]
    pub volume: f64,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

impl From<WireBar> for Bar {
    fn from(wire: WireBar) -> Self {
        Bar::new(
            wire.timestamp.timestamp(),
            wire.open,
            wire.high,
            wire.low,
            wire.close,
        )
        .with_volume(wire.volume)
    }
}

/// Parse one text message of the market data stream
pub fn parse_frames(text: &str) -> Result<Vec<StreamFrame>, AlpacaError> {
    serde_json::from_str(text).map_err(AlpacaError::from)
}

/// Error types for Alpaca API operations
#[derive(Debug, thiserror::Error)]
pub enum AlpacaError {
    #[error("HTTP request error: {0}")]
    HttpRequestError(String),
    #[error("HTTP status error: {0} - {1}")]
    HttpStatusError(u16, String),
    #[error("Stream connection error: {0}")]
    ConnectionError(String),
    #[error("Stream authentication failed: {0}")]
    AuthError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Missing Alpaca credentials")]
    MissingCredentials,
}

impl From<reqwest::Error> for AlpacaError {
    fn from(error: reqwest::Error) -> Self {
        AlpacaError::HttpRequestError(error.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AlpacaError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        AlpacaError::ConnectionError(error.to_string())
    }
}

impl From<AlpacaError> for LookupError {
    fn from(error: AlpacaError) -> Self {
        match error {
            AlpacaError::HttpRequestError(msg) | AlpacaError::ConnectionError(msg) => {
                LookupError::Transport(msg)
            }
            other => LookupError::Backend(other.to_string()),
        }
    }
}

impl From<AlpacaError> for OrderError {
    fn from(error: AlpacaError) -> Self {
        match error {
            AlpacaError::HttpRequestError(msg) | AlpacaError::ConnectionError(msg) => {
                OrderError::Transport(msg)
            }
            AlpacaError::HttpStatusError(_, body) => OrderError::Rejected(body),
            other => OrderError::Rejected(other.to_string()),
        }
    }
}

impl AlpacaError {
    /// Map onto the engine's stream start taxonomy
    pub fn into_start_error(self, symbol: &str) -> StreamStartError {
        match self {
            AlpacaError::ConnectionError(msg) | AlpacaError::HttpRequestError(msg) => {
                StreamStartError::Transport(msg)
            }
            other => StreamStartError::Rejected {
                symbol: symbol.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
