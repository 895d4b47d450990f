//! Backend RPC port
//!
//! The engine reaches the remote trading service only through [`MarketBackend`].
//! Two adapters are provided: an in-process simulator and the Alpaca REST/WebSocket client.

pub mod mock;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::alpaca::AlpacaBackend;
use crate::config::{BackendKind, Config};

pub use mock::MockBackend;
pub use types::*;

/// Remote procedures consumed by the market view engine
#[async_trait]
pub trait MarketBackend: Send + Sync {
    /// Short name used in logs and status output
    fn name(&self) -> &'static str;

    /// Look up candidate tickers for free text
    async fn search_symbols(&self, text: &str) -> Result<Vec<String>, LookupError>;

    /// Subscribe to live bars for `symbol`; bars are pushed into `sink` out-of-band
    async fn start_stream(
        &self,
        symbol: &str,
        sink: BarSink,
    ) -> Result<StreamToken, StreamStartError>;

    /// Best-effort unsubscribe, no acknowledgment
    async fn stop_stream(&self, token: StreamToken);

    /// Submit a single order, no retry
    async fn place_order(&self, order: OrderRequest) -> Result<OrderConfirmation, OrderError>;
}

/// Build the backend selected by configuration.
///
/// Must be called from within a tokio runtime since the Alpaca adapter spawns its stream worker.
pub fn build_backend(config: &Config) -> Result<Arc<dyn MarketBackend>> {
    let backend: Arc<dyn MarketBackend> = match config.backend {
        BackendKind::Mock => Arc::new(MockBackend::new()),
        BackendKind::Alpaca => Arc::new(AlpacaBackend::new(
            &config.alpaca,
            config.engine.max_candidates,
        )?),
    };

    info!("Using {} backend", backend.name());
    Ok(backend)
}
