//! Market view controller
//!
//! Single owner of which symbol and which stream session are current. Every outcome of
//! asynchronous work passes through [`MarketViewController::handle_event`] and is checked
//! against the identifiers the controller still trusts before it touches any state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::MarketBackend;
use crate::backend::types::{
    Bar, LookupError, OrderConfirmation, OrderError, OrderRequest, RequestId, SessionId, Side,
    StreamStartError, StreamToken,
};
use crate::config::{Config, EngineConfig};
use crate::metrics::EngineMetrics;

use super::debounce::{DebounceOutcome, SearchDebouncer};
use super::events::{EngineCommand, EngineEvent, EngineStatus, ViewUpdate};
use super::lookup::SymbolLookupClient;
use super::series::{ChartSeriesBuffer, MergeOutcome};
use super::stream_session::{StartAck, StreamHandle, StreamSession, StreamStatus};

/// What happened to an incoming bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarDisposition {
    Applied(MergeOutcome),
    /// Tagged with a session that is no longer trusted
    Stale,
}

pub struct MarketViewController {
    backend: Arc<dyn MarketBackend>,
    events: mpsc::UnboundedSender<EngineEvent>,
    updates: mpsc::UnboundedSender<ViewUpdate>,
    debouncer: SearchDebouncer,
    lookup: SymbolLookupClient,
    session: StreamSession,
    series: ChartSeriesBuffer,
    selected_symbol: Option<String>,
    trusted_session: Option<SessionId>,
    applied_request: RequestId,
    candidates: Vec<String>,
    metrics: EngineMetrics,
}

impl MarketViewController {
    pub fn new(
        backend: Arc<dyn MarketBackend>,
        config: &EngineConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
        updates: mpsc::UnboundedSender<ViewUpdate>,
    ) -> Self {
        Self {
            debouncer: SearchDebouncer::new(config.debounce(), events.clone()),
            lookup: SymbolLookupClient::new(
                backend.clone(),
                events.clone(),
                config.lookup_timeout(),
                config.max_candidates,
            ),
            session: StreamSession::new(
                backend.clone(),
                events.clone(),
                config.stream_start_timeout(),
            ),
            series: ChartSeriesBuffer::new(config.max_bars),
            backend,
            events,
            updates,
            selected_symbol: None,
            trusted_session: None,
            applied_request: 0,
            candidates: Vec::new(),
            metrics: EngineMetrics::default(),
        }
    }

    /// Apply a user command; returns false once the engine should shut down
    pub fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!("Handling command: {:?}", command);

        match command {
            EngineCommand::Input(text) => self.on_input(&text),
            EngineCommand::Select(symbol) => {
                self.select_symbol(&symbol);
            }
            EngineCommand::Stop => {
                self.stop_stream();
            }
            EngineCommand::PlaceOrder { quantity, side } => {
                if let Err(e) = self.place_order(quantity, side) {
                    debug!("Order not submitted: {}", e);
                }
            }
            EngineCommand::Status => {
                let status = self.status();
                self.publish(ViewUpdate::Status(status));
            }
            EngineCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SearchDue { generation, text } => self.on_search_due(generation, &text),
            EngineEvent::SearchCompleted {
                request_id,
                text,
                result,
            } => self.on_search_completed(request_id, text, result),
            EngineEvent::StreamStarted {
                session_id,
                result,
                latency,
            } => self.on_stream_started(session_id, result, latency),
            EngineEvent::Bar { session_id, bar } => {
                self.on_bar(session_id, bar);
            }
            EngineEvent::StreamClosed { session_id } => self.on_stream_closed(session_id),
            EngineEvent::OrderCompleted { request, result } => {
                self.on_order_completed(request, result)
            }
        }
    }

    pub fn on_input(&mut self, text: &str) {
        if self.debouncer.input(text) == DebounceOutcome::Cleared {
            // Anything still in flight belongs to text that is gone
            self.applied_request = self.lookup.last_dispatched();
            self.candidates.clear();
            self.publish(ViewUpdate::CandidatesCleared);
        }
    }

    fn on_search_due(&mut self, generation: u64, text: &str) {
        if !self.debouncer.is_current(generation) {
            debug!("Dropping superseded search timer for {:?}", text);
            return;
        }

        self.lookup.dispatch(text);
        self.metrics.record_lookup_dispatched();
    }

    fn on_search_completed(
        &mut self,
        request_id: RequestId,
        query: String,
        result: Result<Vec<String>, LookupError>,
    ) {
        if request_id <= self.applied_request {
            debug!(
                "Dropping stale lookup #{} for {:?} (applied #{})",
                request_id, query, self.applied_request
            );
            self.metrics.record_stale_lookup();
            return;
        }
        self.applied_request = request_id;

        match result {
            Ok(symbols) => {
                debug!("Lookup #{} for {:?}: {:?}", request_id, query, symbols);
                self.candidates = symbols.clone();
                self.publish(ViewUpdate::Candidates { query, symbols });
            }
            Err(error) => {
                warn!("Lookup #{} for {:?} failed: {}", request_id, query, error);
                self.metrics.record_lookup_failure();
                self.candidates.clear();
                self.publish(ViewUpdate::SearchFailed { query, error });
            }
        }
    }

    /// Switch the chart to `symbol`; returns the new session id, or None for blank input
    pub fn select_symbol(&mut self, symbol: &str) -> Option<SessionId> {
        let symbol = Config::normalize_symbol(symbol);
        if symbol.is_empty() {
            warn!("Ignoring selection of an empty symbol");
            return None;
        }

        let session_id = self.session.start(&symbol);
        self.trusted_session = Some(session_id);
        self.selected_symbol = Some(symbol.clone());
        self.series.reset();

        info!("Selected {} (session {})", symbol, session_id);

        self.publish(ViewUpdate::StreamState {
            symbol: symbol.clone(),
            session_id,
            status: StreamStatus::Pending,
            message: None,
        });
        self.publish(ViewUpdate::Chart {
            symbol,
            session_id,
            outcome: None,
            bars: Vec::new(),
        });

        Some(session_id)
    }

    fn on_stream_started(
        &mut self,
        session_id: SessionId,
        result: Result<StreamToken, StreamStartError>,
        latency: Duration,
    ) {
        match self.session.on_started(session_id, result) {
            StartAck::Activated { symbol } => {
                self.metrics.record_session_started();
                self.metrics.record_ack_latency(latency);
                self.publish(ViewUpdate::StreamState {
                    symbol,
                    session_id,
                    status: StreamStatus::Active,
                    message: None,
                });
            }
            StartAck::Failed { symbol, error } => {
                self.metrics.record_start_failure();
                let message = format!("Could not stream {}: {}", symbol, error);
                self.publish(ViewUpdate::StreamState {
                    symbol,
                    session_id,
                    status: StreamStatus::Failed(error),
                    message: Some(message),
                });
            }
            StartAck::Ended { symbol } => {
                self.metrics.record_session_started();
                self.metrics.record_ack_latency(latency);
                self.publish_stream_ended(symbol, session_id);
            }
            StartAck::Superseded => {
                debug!("Ignoring start acknowledgment of session {}", session_id);
            }
        }
    }

    pub fn on_bar(&mut self, session_id: SessionId, bar: Bar) -> BarDisposition {
        if self.trusted_session != Some(session_id) {
            return self.drop_stale(session_id, bar);
        }
        let Some(symbol) = self.selected_symbol.clone() else {
            return self.drop_stale(session_id, bar);
        };

        let outcome = self.series.merge(bar);
        if outcome == MergeOutcome::Discarded {
            debug!("Bar at {} is older than the retained series", bar.time);
            return BarDisposition::Applied(outcome);
        }

        self.metrics.record_bar_applied();
        let update = ViewUpdate::Chart {
            symbol,
            session_id,
            outcome: Some(outcome),
            bars: self.series.snapshot(),
        };
        self.publish(update);

        BarDisposition::Applied(outcome)
    }

    fn drop_stale(&mut self, session_id: SessionId, bar: Bar) -> BarDisposition {
        debug!(
            "Dropping bar at {} from session {} (trusted {:?})",
            bar.time, session_id, self.trusted_session
        );
        self.metrics.record_stale_bar();
        BarDisposition::Stale
    }

    fn on_stream_closed(&mut self, session_id: SessionId) {
        if !self.session.on_transport_closed(session_id) {
            debug!("Feed of session {} closed", session_id);
            return;
        }

        if let Some(symbol) = self.selected_symbol.clone() {
            self.publish_stream_ended(symbol, session_id);
        }
    }

    fn publish_stream_ended(&mut self, symbol: String, session_id: SessionId) {
        let message = format!("{} stream ended", symbol);
        self.publish(ViewUpdate::StreamState {
            symbol,
            session_id,
            status: StreamStatus::Stopped,
            message: Some(message),
        });
    }

    /// Stop the live stream on user request; residual bars are dropped from here on
    pub fn stop_stream(&mut self) -> bool {
        let stopped = self.session.stop();
        self.trusted_session = None;

        if stopped {
            if let Some(handle) = self.session.handle() {
                info!("Stopped stream for {}", handle.symbol);
                let update = ViewUpdate::StreamState {
                    symbol: handle.symbol.clone(),
                    session_id: handle.session_id,
                    status: StreamStatus::Stopped,
                    message: None,
                };
                self.publish(update);
            }
        }
        stopped
    }

    /// Validate and submit a market order for the selected symbol
    pub fn place_order(&mut self, quantity: f64, side: Side) -> Result<(), OrderError> {
        let validated = match self.selected_symbol.clone() {
            None => Err(OrderError::NoSymbolSelected),
            Some(_) if !quantity.is_finite() || quantity <= 0.0 => {
                Err(OrderError::InvalidQuantity(quantity))
            }
            Some(symbol) => Ok(OrderRequest {
                symbol,
                quantity,
                side,
            }),
        };

        let request = match validated {
            Ok(request) => request,
            Err(error) => {
                warn!("Order rejected locally: {}", error);
                self.publish(ViewUpdate::OrderFailed {
                    request: None,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        info!(
            "Placing {} order for {} {}",
            request.side, request.quantity, request.symbol
        );

        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.place_order(request.clone()).await;
            let _ = events.send(EngineEvent::OrderCompleted { request, result });
        });

        Ok(())
    }

    fn on_order_completed(
        &mut self,
        request: OrderRequest,
        result: Result<OrderConfirmation, OrderError>,
    ) {
        self.metrics.record_order(result.is_ok());

        match result {
            Ok(confirmation) => {
                info!(
                    "Order {} for {} {}: {}",
                    confirmation.order_id,
                    confirmation.quantity,
                    confirmation.symbol,
                    confirmation.status
                );
                self.publish(ViewUpdate::OrderPlaced(confirmation));
            }
            Err(error) => {
                warn!("Order for {} failed: {}", request.symbol, error);
                self.publish(ViewUpdate::OrderFailed {
                    request: Some(request),
                    error,
                });
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            backend: self.backend.name(),
            symbol: self.selected_symbol.clone(),
            session_id: self.trusted_session,
            stream: self.session.handle().map(|h| h.status.clone()),
            bar_count: self.series.len(),
            latest_bar: self.series.latest().copied(),
            candidate_count: self.candidates.len(),
            counters: self.metrics.snapshot(),
        }
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down market view");
        self.debouncer.cancel();
        self.session.stop();
        self.trusted_session = None;
    }

    fn publish(&self, update: ViewUpdate) {
        if self.updates.send(update).is_err() {
            debug!("View update receiver dropped");
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn snapshot(&self) -> Vec<Bar> {
        self.series.snapshot()
    }

    pub fn selected_symbol(&self) -> Option<&str> {
        self.selected_symbol.as_deref()
    }

    pub fn trusted_session(&self) -> Option<SessionId> {
        self.trusted_session
    }

    pub fn stream_handle(&self) -> Option<&StreamHandle> {
        self.session.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    struct Harness {
        controller: MarketViewController,
        backend: Arc<MockBackend>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        updates: mpsc::UnboundedReceiver<ViewUpdate>,
    }

    impl Harness {
        fn new(backend: MockBackend) -> Self {
            let backend = Arc::new(backend);
            let (event_tx, events) = mpsc::unbounded_channel();
            let (update_tx, updates) = mpsc::unbounded_channel();
            let controller = MarketViewController::new(
                backend.clone(),
                &EngineConfig::default(),
                event_tx,
                update_tx,
            );
            Self {
                controller,
                backend,
                events,
                updates,
            }
        }

        /// Feed events back into the controller until `done` matches one
        async fn pump_until(&mut self, done: impl Fn(&EngineEvent) -> bool) {
            while let Some(event) = self.events.recv().await {
                let stop = done(&event);
                self.controller.handle_event(event);
                if stop {
                    return;
                }
            }
        }

        fn drain_updates(&mut self) -> Vec<ViewUpdate> {
            let mut drained = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                drained.push(update);
            }
            drained
        }
    }

    fn bar(time: i64, close: f64) -> Bar {
        Bar::new(time, close, close, close, close)
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_ack_is_ignored() {
        let backend = MockBackend::new()
            .with_start_delay("AAPL", Duration::from_millis(10))
            .with_start_delay("MSFT", Duration::from_millis(50))
            .with_bar_interval(Duration::from_secs(3600));
        let mut h = Harness::new(backend);

        let first = h.controller.select_symbol("AAPL").unwrap();
        let second = h.controller.select_symbol("MSFT").unwrap();
        assert_eq!((first, second), (1, 2));

        h.pump_until(|e| matches!(e, EngineEvent::StreamStarted { session_id: 1, .. }))
            .await;
        assert!(h.controller.snapshot().is_empty());
        assert_eq!(h.controller.trusted_session(), Some(2));
        assert_eq!(
            h.controller.stream_handle().unwrap().status,
            StreamStatus::Pending
        );

        h.pump_until(|e| matches!(e, EngineEvent::StreamStarted { session_id: 2, .. }))
            .await;
        assert_eq!(
            h.controller.stream_handle().unwrap().status,
            StreamStatus::Active
        );

        assert_eq!(
            h.controller.on_bar(2, bar(100, 1.0)),
            BarDisposition::Applied(MergeOutcome::Appended)
        );
        let times: Vec<i64> = h.controller.snapshot().iter().map(|b| b.time).collect();
        assert_eq!(times, vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_closed_before_ack_ends_stream() {
        let backend = MockBackend::new().with_start_delay("AAPL", Duration::from_secs(3600));
        let mut h = Harness::new(backend);

        let session_id = h.controller.select_symbol("AAPL").unwrap();
        h.controller.handle_event(EngineEvent::StreamClosed { session_id });
        assert_eq!(
            h.controller.stream_handle().unwrap().status,
            StreamStatus::Pending
        );

        let token = StreamToken::new("feed-1");
        h.controller.handle_event(EngineEvent::StreamStarted {
            session_id,
            result: Ok(token.clone()),
            latency: Duration::from_millis(5),
        });

        assert_eq!(
            h.controller.stream_handle().unwrap().status,
            StreamStatus::Stopped
        );
        assert_eq!(
            h.drain_updates().last(),
            Some(&ViewUpdate::StreamState {
                symbol: "AAPL".to_string(),
                session_id,
                status: StreamStatus::Stopped,
                message: Some("AAPL stream ended".to_string()),
            })
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.backend.stopped_tokens().await, vec![token]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_bars_are_dropped() {
        let mut h = Harness::new(MockBackend::new().with_bar_interval(Duration::from_secs(3600)));

        h.controller.select_symbol("AAPL");
        h.controller.select_symbol("MSFT");

        assert_eq!(h.controller.on_bar(1, bar(100, 1.0)), BarDisposition::Stale);
        assert_eq!(
            h.controller.on_bar(2, bar(100, 1.0)),
            BarDisposition::Applied(MergeOutcome::Appended)
        );
        assert_eq!(h.controller.status().counters.stale_bars_dropped, 1);
        assert_eq!(h.controller.status().bar_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_resets_chart_even_for_same_symbol() {
        let mut h = Harness::new(MockBackend::new().with_bar_interval(Duration::from_secs(3600)));

        let first = h.controller.select_symbol("aapl").unwrap();
        h.controller.on_bar(first, bar(100, 1.0));
        let second = h.controller.select_symbol("AAPL").unwrap();

        assert_ne!(first, second);
        assert!(h.controller.snapshot().is_empty());
        assert_eq!(h.controller.selected_symbol(), Some("AAPL"));
        assert_eq!(h.controller.on_bar(first, bar(101, 1.0)), BarDisposition::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_selection_is_ignored() {
        let mut h = Harness::new(MockBackend::new());
        assert_eq!(h.controller.select_symbol("   "), None);
        assert!(h.controller.stream_handle().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_lookup_keeps_latest() {
        let backend = MockBackend::new()
            .with_search_delay("A", Duration::from_millis(200))
            .with_search_delay("AM", Duration::from_millis(20));
        let mut h = Harness::new(backend);

        h.controller.lookup.dispatch("A");
        h.controller.lookup.dispatch("AM");

        h.pump_until(|e| matches!(e, EngineEvent::SearchCompleted { request_id: 1, .. }))
            .await;

        assert_eq!(h.controller.candidates(), ["AMD", "AMZN"]);
        assert_eq!(h.controller.status().counters.stale_lookups_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_clears_without_backend_call() {
        let mut h = Harness::new(MockBackend::new());

        h.controller.on_input("  ");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.backend.search_calls(), 0);
        assert_eq!(h.drain_updates(), vec![ViewUpdate::CandidatesCleared]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_in_flight_lookup() {
        let backend = MockBackend::new().with_search_delay("N", Duration::from_millis(500));
        let mut h = Harness::new(backend);

        h.controller.on_input("N");
        h.pump_until(|e| matches!(e, EngineEvent::SearchDue { .. }))
            .await;
        h.controller.on_input("");

        h.pump_until(|e| matches!(e, EngineEvent::SearchCompleted { .. }))
            .await;
        assert!(h.controller.candidates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_search_surfaces_error() {
        let mut h = Harness::new(MockBackend::new().with_failing_search("XX"));

        h.controller.on_input("xx");
        h.pump_until(|e| matches!(e, EngineEvent::SearchCompleted { .. }))
            .await;

        let updates = h.drain_updates();
        assert!(matches!(
            updates.last(),
            Some(ViewUpdate::SearchFailed { query, error: LookupError::Backend(_) }) if query == "xx"
        ));
        assert!(h.controller.candidates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_reported() {
        let mut h = Harness::new(MockBackend::new().with_failing_symbol("TSLA"));

        h.controller.select_symbol("TSLA");
        h.pump_until(|e| matches!(e, EngineEvent::StreamStarted { .. }))
            .await;

        let updates = h.drain_updates();
        match updates.last() {
            Some(ViewUpdate::StreamState {
                status: StreamStatus::Failed(StreamStartError::Rejected { symbol, .. }),
                message: Some(message),
                ..
            }) => {
                assert_eq!(symbol, "TSLA");
                assert!(message.contains("TSLA"));
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(h.controller.status().counters.start_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_drops_residual_bars() {
        let mut h = Harness::new(MockBackend::new().with_bar_interval(Duration::from_secs(3600)));

        let id = h.controller.select_symbol("NVDA").unwrap();
        h.pump_until(|e| matches!(e, EngineEvent::StreamStarted { .. }))
            .await;

        assert!(h.controller.stop_stream());
        assert_eq!(h.controller.on_bar(id, bar(1, 1.0)), BarDisposition::Stale);
        assert!(!h.controller.stop_stream());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.backend.stopped_tokens().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_validation() {
        let mut h = Harness::new(MockBackend::new());

        assert_eq!(
            h.controller.place_order(1.0, Side::Buy),
            Err(OrderError::NoSymbolSelected)
        );

        h.controller.select_symbol("AMZN");
        assert_eq!(
            h.controller.place_order(0.0, Side::Sell),
            Err(OrderError::InvalidQuantity(0.0))
        );
        assert!(h.controller.place_order(f64::NAN, Side::Sell).is_err());
        assert!(h.controller.place_order(3.0, Side::Sell).is_ok());

        h.pump_until(|e| matches!(e, EngineEvent::OrderCompleted { .. }))
            .await;

        let placed = h.backend.placed_orders().await;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].symbol, "AMZN");
        assert!(
            h.drain_updates()
                .iter()
                .any(|u| matches!(u, ViewUpdate::OrderPlaced(c) if c.side == Side::Sell))
        );
        assert_eq!(h.controller.status().counters.orders_placed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_order_command_keeps_engine_running() {
        let mut h = Harness::new(MockBackend::new());
        h.controller.select_symbol("AMZN");
        h.drain_updates();

        assert!(h.controller.handle_command(EngineCommand::PlaceOrder {
            quantity: -1.0,
            side: Side::Buy,
        }));

        assert_eq!(
            h.drain_updates(),
            vec![ViewUpdate::OrderFailed {
                request: None,
                error: OrderError::InvalidQuantity(-1.0),
            }]
        );
        assert!(h.backend.placed_orders().await.is_empty());
    }
}
