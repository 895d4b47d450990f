//! Symbol lookup dispatch

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backend::MarketBackend;
use crate::backend::types::{LookupError, RequestId};

use super::events::EngineEvent;

/// A dispatched lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolQuery {
    pub text: String,
    pub request_id: RequestId,
}

/// Issues independent lookups, each tagged with a fresh, strictly increasing id
pub struct SymbolLookupClient {
    backend: Arc<dyn MarketBackend>,
    events: mpsc::UnboundedSender<EngineEvent>,
    next_request_id: RequestId,
    timeout: Duration,
    max_candidates: usize,
}

impl SymbolLookupClient {
    pub fn new(
        backend: Arc<dyn MarketBackend>,
        events: mpsc::UnboundedSender<EngineEvent>,
        timeout: Duration,
        max_candidates: usize,
    ) -> Self {
        Self {
            backend,
            events,
            next_request_id: 1,
            timeout,
            max_candidates,
        }
    }

    /// Spawn the lookup; the outcome arrives later as `SearchCompleted`
    pub fn dispatch(&mut self, text: &str) -> SymbolQuery {
        let query = SymbolQuery {
            text: text.to_string(),
            request_id: self.next_request_id,
        };
        self.next_request_id += 1;

        debug!("Dispatching lookup #{} for {:?}", query.request_id, query.text);

        let backend = self.backend.clone();
        let events = self.events.clone();
        let bound = self.timeout;
        let limit = self.max_candidates;
        let SymbolQuery { text, request_id } = query.clone();

        tokio::spawn(async move {
            let result = match timeout(bound, backend.search_symbols(&text)).await {
                Ok(Ok(mut symbols)) => {
                    symbols.truncate(limit);
                    Ok(symbols)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!("Lookup #{} for {:?} timed out", request_id, text);
                    Err(LookupError::Timeout(bound.as_millis() as u64))
                }
            };

            let _ = events.send(EngineEvent::SearchCompleted {
                request_id,
                text,
                result,
            });
        });

        query
    }

    /// Id of the most recently dispatched lookup, 0 if none
    pub fn last_dispatched(&self) -> RequestId {
        self.next_request_id - 1
    }
}
