//! Alpaca API integration module
//!
//! Trading REST calls (asset search, orders) and the market data WebSocket stream
//! behind the engine's backend port.

pub mod rest;
pub mod types;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::MarketBackend;
use crate::backend::types::{
    BarSink, LookupError, OrderConfirmation, OrderError, OrderRequest, StreamStartError,
    StreamToken,
};
use crate::config::AlpacaConfig;

pub use rest::{AlpacaRestClient, rank_candidates};
pub use types::*;
pub use websocket::AlpacaStreamClient;

/// Backend adapter talking to Alpaca
pub struct AlpacaBackend {
    rest: AlpacaRestClient,
    stream: AlpacaStreamClient,
    assets: Mutex<Option<Arc<Vec<Asset>>>>,
    max_candidates: usize,
}

impl AlpacaBackend {
    pub fn new(config: &AlpacaConfig, max_candidates: usize) -> Result<Self, AlpacaError> {
        if !config.has_credentials() {
            return Err(AlpacaError::MissingCredentials);
        }

        let rest = AlpacaRestClient::new(
            config.trading_url.clone(),
            config.api_key_id.clone(),
            config.api_secret_key.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?;
        let stream = AlpacaStreamClient::new(
            config.stream_endpoint(),
            config.api_key_id.clone(),
            config.api_secret_key.clone(),
        );

        Ok(Self {
            rest,
            stream,
            assets: Mutex::new(None),
            max_candidates,
        })
    }

    /// Asset list, fetched on first use and cached for the process lifetime
    async fn assets(&self) -> Result<Arc<Vec<Asset>>, AlpacaError> {
        let mut cached = self.assets.lock().await;
        if let Some(assets) = cached.as_ref() {
            return Ok(assets.clone());
        }

        let assets = Arc::new(self.rest.list_assets().await?);
        *cached = Some(assets.clone());
        Ok(assets)
    }
}

#[async_trait]
impl MarketBackend for AlpacaBackend {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    async fn search_symbols(&self, text: &str) -> Result<Vec<String>, LookupError> {
        let assets = self.assets().await?;
        let candidates = rank_candidates(&assets, text, self.max_candidates);
        debug!("Alpaca lookup for {:?}: {:?}", text, candidates);
        Ok(candidates)
    }

    async fn start_stream(
        &self,
        symbol: &str,
        sink: BarSink,
    ) -> Result<StreamToken, StreamStartError> {
        let symbol = symbol.to_uppercase();
        let token = self
            .stream
            .subscribe(&symbol, sink)
            .await
            .map_err(|e| e.into_start_error(&symbol))?;

        info!("Alpaca bar stream started for {} ({})", symbol, token);
        Ok(token)
    }

    async fn stop_stream(&self, token: StreamToken) {
        self.stream.unsubscribe(token);
    }

    async fn place_order(&self, order: OrderRequest) -> Result<OrderConfirmation, OrderError> {
        let placed = self.rest.submit_order(&order).await?;

        Ok(OrderConfirmation {
            order_id: placed.id,
            symbol: placed.symbol,
            quantity: placed
                .qty
                .as_deref()
                .and_then(|qty| qty.parse().ok())
                .unwrap_or(order.quantity),
            side: placed.side,
            status: placed.status,
        })
    }
}
