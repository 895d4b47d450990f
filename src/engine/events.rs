//! Messages flowing into and out of the market view engine

use std::time::Duration;

use crate::backend::types::{
    Bar, LookupError, OrderConfirmation, OrderError, OrderRequest, RequestId, SessionId, Side,
    StreamStartError, StreamToken,
};
use crate::metrics::EngineCounters;

use super::series::MergeOutcome;
use super::stream_session::StreamStatus;

/// Outcomes of asynchronous work, reported back to the engine task.
///
/// Every variant carries the identifier it was issued under; the controller decides
/// whether the outcome is still relevant.
#[derive(Debug)]
pub enum EngineEvent {
    /// Quiet period elapsed for the keystroke of `generation`
    SearchDue { generation: u64, text: String },
    /// A symbol lookup finished
    SearchCompleted {
        request_id: RequestId,
        text: String,
        result: Result<Vec<String>, LookupError>,
    },
    /// A stream start was acknowledged, rejected or timed out
    StreamStarted {
        session_id: SessionId,
        result: Result<StreamToken, StreamStartError>,
        latency: Duration,
    },
    /// A bar arrived on the feed opened for `session_id`
    Bar { session_id: SessionId, bar: Bar },
    /// The backend dropped the feed opened for `session_id`
    StreamClosed { session_id: SessionId },
    /// An order call returned
    OrderCompleted {
        request: OrderRequest,
        result: Result<OrderConfirmation, OrderError>,
    },
}

/// User intents accepted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Current content of the search box
    Input(String),
    /// Pick a symbol for the chart
    Select(String),
    /// Stop the live stream without selecting another symbol
    Stop,
    PlaceOrder { quantity: f64, side: Side },
    /// Request a [`ViewUpdate::Status`]
    Status,
    Shutdown,
}

/// Point-in-time engine state for status output
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub backend: &'static str,
    pub symbol: Option<String>,
    pub session_id: Option<SessionId>,
    pub stream: Option<StreamStatus>,
    pub bar_count: usize,
    pub latest_bar: Option<Bar>,
    pub candidate_count: usize,
    pub counters: EngineCounters,
}

/// Updates published to whatever renders the market view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    /// Fresh candidate list for `query`
    Candidates { query: String, symbols: Vec<String> },
    /// Search box emptied
    CandidatesCleared,
    /// Lookup failed; the candidate list is now empty
    SearchFailed { query: String, error: LookupError },
    /// Chart series changed
    Chart {
        symbol: String,
        session_id: SessionId,
        outcome: Option<MergeOutcome>,
        bars: Vec<Bar>,
    },
    /// Stream lifecycle transition
    StreamState {
        symbol: String,
        session_id: SessionId,
        status: StreamStatus,
        message: Option<String>,
    },
    OrderPlaced(OrderConfirmation),
    OrderFailed { request: Option<OrderRequest>, error: OrderError },
    Status(EngineStatus),
}
