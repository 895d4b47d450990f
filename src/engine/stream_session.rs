//! Lifecycle of the single live bar stream

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::backend::MarketBackend;
use crate::backend::types::{Bar, SessionId, StreamStartError, StreamToken};

use super::events::EngineEvent;

/// Stream handle states
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    Pending,
    Active,
    Stopped,
    Failed(StreamStartError),
}

impl StreamStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, StreamStatus::Pending | StreamStatus::Active)
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Pending => f.write_str("pending"),
            StreamStatus::Active => f.write_str("active"),
            StreamStatus::Stopped => f.write_str("stopped"),
            StreamStatus::Failed(e) => write!(f, "failed ({})", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamHandle {
    pub symbol: String,
    pub session_id: SessionId,
    pub status: StreamStatus,
}

/// Result of folding a start acknowledgment into the session
#[derive(Debug, Clone, PartialEq)]
pub enum StartAck {
    Activated { symbol: String },
    Failed { symbol: String, error: StreamStartError },
    /// The feed closed before the ack arrived; the session went straight to Stopped
    Ended { symbol: String },
    /// The session was stopped or replaced before the ack arrived
    Superseded,
}

/// Owns the one stream that may be Pending or Active.
///
/// `start` never waits for the backend: the subscribe call runs on its own task and
/// reports back as `StreamStarted`, bars are relayed as `Bar` events tagged with the
/// session they were started under.
pub struct StreamSession {
    backend: Arc<dyn MarketBackend>,
    events: mpsc::UnboundedSender<EngineEvent>,
    start_timeout: Duration,
    next_session_id: SessionId,
    handle: Option<StreamHandle>,
    token: Option<StreamToken>,
    /// Transport closed while the current session was still Pending
    closed_early: bool,
}

impl StreamSession {
    pub fn new(
        backend: Arc<dyn MarketBackend>,
        events: mpsc::UnboundedSender<EngineEvent>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            events,
            start_timeout,
            next_session_id: 1,
            handle: None,
            token: None,
            closed_early: false,
        }
    }

    pub fn start(&mut self, symbol: &str) -> SessionId {
        self.stop();

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        info!("Stream session {} requested for {}", session_id, symbol);
        self.closed_early = false;

        self.handle = Some(StreamHandle {
            symbol: symbol.to_string(),
            session_id,
            status: StreamStatus::Pending,
        });

        let (bar_tx, bar_rx) = mpsc::unbounded_channel();
        tokio::spawn(relay(session_id, bar_rx, self.events.clone()));

        let backend = self.backend.clone();
        let events = self.events.clone();
        let bound = self.start_timeout;
        let symbol = symbol.to_string();

        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = match timeout(bound, backend.start_stream(&symbol, bar_tx)).await {
                Ok(result) => result,
                Err(_) => Err(StreamStartError::Timeout(bound.as_millis() as u64)),
            };

            let _ = events.send(EngineEvent::StreamStarted {
                session_id,
                result,
                latency: started_at.elapsed(),
            });
        });

        session_id
    }

    pub fn on_started(
        &mut self,
        session_id: SessionId,
        result: Result<StreamToken, StreamStartError>,
    ) -> StartAck {
        let pending = self
            .handle
            .as_mut()
            .filter(|h| h.session_id == session_id && h.status == StreamStatus::Pending);

        let Some(handle) = pending else {
            if let Ok(token) = result {
                debug!("Releasing feed {} of superseded session {}", token, session_id);
                self.release(token);
            }
            return StartAck::Superseded;
        };

        match result {
            Ok(token) if self.closed_early => {
                info!(
                    "Stream session {} for {} ended before its acknowledgment",
                    session_id, handle.symbol
                );
                handle.status = StreamStatus::Stopped;
                let symbol = handle.symbol.clone();
                self.closed_early = false;
                self.release(token);
                StartAck::Ended { symbol }
            }
            Ok(token) => {
                info!(
                    "Stream session {} active for {} ({})",
                    session_id, handle.symbol, token
                );
                handle.status = StreamStatus::Active;
                self.token = Some(token);
                StartAck::Activated {
                    symbol: handle.symbol.clone(),
                }
            }
            Err(error) => {
                warn!(
                    "Stream session {} for {} failed: {}",
                    session_id, handle.symbol, error
                );
                handle.status = StreamStatus::Failed(error.clone());
                StartAck::Failed {
                    symbol: handle.symbol.clone(),
                    error,
                }
            }
        }
    }

    /// Transition to Stopped and unsubscribe without waiting; returns whether anything was live
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut().filter(|h| h.status.is_live()) else {
            return false;
        };

        debug!("Stopping stream session {} ({})", handle.session_id, handle.symbol);
        handle.status = StreamStatus::Stopped;

        if let Some(token) = self.token.take() {
            self.release(token);
        }
        true
    }

    /// The backend dropped the feed; returns whether the current Active session ended.
    ///
    /// A close that overtakes the start ack of the current Pending session is kept
    /// and applied when the ack arrives.
    pub fn on_transport_closed(&mut self, session_id: SessionId) -> bool {
        let Some(handle) = self
            .handle
            .as_mut()
            .filter(|h| h.session_id == session_id)
        else {
            return false;
        };

        match handle.status {
            StreamStatus::Active => {
                info!("Stream session {} for {} ended by backend", session_id, handle.symbol);
                handle.status = StreamStatus::Stopped;
                self.token = None;
                true
            }
            StreamStatus::Pending => {
                debug!("Feed of pending session {} closed ahead of its ack", session_id);
                self.closed_early = true;
                false
            }
            _ => false,
        }
    }

    fn release(&self, token: StreamToken) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            backend.stop_stream(token).await;
        });
    }

    pub fn handle(&self) -> Option<&StreamHandle> {
        self.handle.as_ref()
    }

    pub fn token(&self) -> Option<&StreamToken> {
        self.token.as_ref()
    }
}

/// Tag every bar of one feed with its session id; signals `StreamClosed` once the backend drops the sink
pub async fn relay(
    session_id: SessionId,
    mut bars: mpsc::UnboundedReceiver<Bar>,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    while let Some(bar) = bars.recv().await {
        if events.send(EngineEvent::Bar { session_id, bar }).is_err() {
            return;
        }
    }
    let _ = events.send(EngineEvent::StreamClosed { session_id });
}
