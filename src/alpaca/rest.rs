//! Alpaca trading REST API client implementation

use std::time::Duration;

use tracing::{debug, info};

use super::types::{AlpacaError, ApiErrorBody, Asset, OrderPayload, OrderResponse};
use crate::backend::types::OrderRequest;

/// Alpaca trading REST API client
pub struct AlpacaRestClient {
    base_url: String,
    key_id: String,
    secret_key: String,
    client: reqwest::Client,
}

impl AlpacaRestClient {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AlpacaError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            secret_key: secret_key.into(),
            client,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// Fetch every active US equity
    pub async fn list_assets(&self) -> Result<Vec<Asset>, AlpacaError> {
        let url = format!(
            "{}/v2/assets?status=active&asset_class=us_equity",
            self.base_url
        );
        debug!("Fetching asset list from: {}", url);

        let response = self.authed(self.client.get(&url)).send().await?;
        let response = Self::check_status(response).await?;

        let assets: Vec<Asset> = response
            .json()
            .await
            .map_err(|e| AlpacaError::ParseError(format!("Failed to parse assets: {}", e)))?;

        info!("Fetched {} assets", assets.len());
        Ok(assets)
    }

    /// Submit a market day order
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResponse, AlpacaError> {
        let url = format!("{}/v2/orders", self.base_url);
        let payload = OrderPayload {
            symbol: &order.symbol,
            qty: order.quantity.to_string(),
            side: order.side,
            order_type: "market",
            time_in_force: "day",
        };

        debug!("Submitting order to {}: {:?}", url, payload);

        let response = self
            .authed(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let placed: OrderResponse = response
            .json()
            .await
            .map_err(|e| AlpacaError::ParseError(format!("Failed to parse order: {}", e)))?;

        info!(
            "Order {} accepted: {} {} {} ({})",
            placed.id,
            placed.side,
            placed.qty.as_deref().unwrap_or("?"),
            placed.symbol,
            placed.status
        );
        Ok(placed)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AlpacaError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|err| err.message)
            .unwrap_or(body);

        Err(AlpacaError::HttpStatusError(status, message))
    }
}

/// Rank tradable assets for free text.
///
/// Exact symbol match first, then symbol prefix, then case-insensitive name substring.
pub fn rank_candidates(assets: &[Asset], text: &str, limit: usize) -> Vec<String> {
    let needle = text.trim().to_uppercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(u8, &str)> = assets
        .iter()
        .filter(|asset| asset.tradable)
        .filter_map(|asset| {
            let rank = if asset.symbol == needle {
                0
            } else if asset.symbol.starts_with(&needle) {
                1
            } else if asset.name.to_uppercase().contains(&needle) {
                2
            } else {
                return None;
            };
            Some((rank, asset.symbol.as_str()))
        })
        .collect();

    ranked.sort();
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, symbol)| symbol.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(symbol: &str, name: &str, tradable: bool) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: name.to_string(),
            status: "active".to_string(),
            tradable,
        }
    }

    #[test]
    fn test_rank_candidates_ordering() {
        let assets = vec![
            asset("AAPB", "GraniteShares 2x Long AAPL", true),
            asset("AAPL", "Apple Inc.", true),
            asset("APLE", "Apple Hospitality REIT", true),
            asset("AAP", "Advance Auto Parts", true),
            asset("AAPX", "Untradable", false),
        ];

        assert_eq!(
            rank_candidates(&assets, "aap", 10),
            vec!["AAP", "AAPB", "AAPL"]
        );
        assert_eq!(rank_candidates(&assets, "apple", 10), vec!["AAPL", "APLE"]);
        assert_eq!(rank_candidates(&assets, "aap", 1), vec!["AAP"]);
        assert!(rank_candidates(&assets, "  ", 10).is_empty());
    }
}
