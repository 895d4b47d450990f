//! Alpaca market data WebSocket client implementation
//!
//! A single worker task owns the connection. It connects lazily on the first
//! subscription, routes bar frames to every sink registered for the symbol and
//! drops all sinks when the connection goes away. Nothing is retried: the next
//! subscription opens a fresh connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, warn};

use super::types::{AlpacaError, StreamFrame, StreamRequest, parse_frames};
use crate::backend::types::{Bar, BarSink, StreamToken};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum StreamCommand {
    Subscribe {
        symbol: String,
        token: StreamToken,
        sink: BarSink,
        ack: oneshot::Sender<Result<(), AlpacaError>>,
    },
    Unsubscribe {
        token: StreamToken,
    },
}

/// Handle to the market data stream worker
pub struct AlpacaStreamClient {
    command_tx: mpsc::UnboundedSender<StreamCommand>,
    next_token: AtomicU64,
}

impl AlpacaStreamClient {
    /// Spawn the stream worker; must be called from within a tokio runtime
    pub fn new(url: impl Into<String>, key_id: String, secret_key: String) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let worker = StreamWorker {
            url: url.into(),
            key_id,
            secret_key,
            command_rx,
            routes: RouteTable::default(),
        };
        tokio::spawn(worker.run());

        Self {
            command_tx,
            next_token: AtomicU64::new(1),
        }
    }

    /// Register `sink` for the symbol's bars; resolves once the subscribe frame is written
    pub async fn subscribe(&self, symbol: &str, sink: BarSink) -> Result<StreamToken, AlpacaError> {
        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        let token = StreamToken::new(format!("{}-{}", symbol, id));
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(StreamCommand::Subscribe {
                symbol: symbol.to_string(),
                token: token.clone(),
                sink,
                ack: ack_tx,
            })
            .map_err(|_| AlpacaError::ConnectionError("stream worker stopped".to_string()))?;

        ack_rx
            .await
            .map_err(|_| AlpacaError::ConnectionError("stream worker stopped".to_string()))??;

        Ok(token)
    }

    /// Drop the sink registered under `token`
    pub fn unsubscribe(&self, token: StreamToken) {
        if self
            .command_tx
            .send(StreamCommand::Unsubscribe { token })
            .is_err()
        {
            debug!("Stream worker already stopped, unsubscribe ignored");
        }
    }
}

/// Sinks registered per symbol. One exchange subscription covers all sinks of a symbol.
#[derive(Default)]
struct RouteTable {
    routes: HashMap<String, Vec<(StreamToken, BarSink)>>,
}

impl RouteTable {
    /// Register a sink; returns true when the symbol needs a subscribe frame
    fn add(&mut self, symbol: &str, token: StreamToken, sink: BarSink) -> bool {
        let routes = self.routes.entry(symbol.to_string()).or_default();
        let first_for_symbol = routes.is_empty();
        routes.push((token, sink));
        first_for_symbol
    }

    /// Drop the sink under `token`; returns the symbol when its last sink went away
    fn remove(&mut self, token: &StreamToken) -> Option<String> {
        let symbol = self
            .routes
            .iter()
            .find(|(_, routes)| routes.iter().any(|(t, _)| t == token))
            .map(|(symbol, _)| symbol.clone())?;

        let routes = self.routes.get_mut(&symbol)?;
        routes.retain(|(t, _)| t != token);
        if routes.is_empty() {
            self.routes.remove(&symbol);
            Some(symbol)
        } else {
            None
        }
    }

    /// Fan a bar out to every sink of its symbol; returns true when no receiver is left
    fn deliver(&mut self, symbol: &str, bar: Bar) -> bool {
        let Some(routes) = self.routes.get_mut(symbol) else {
            return false;
        };
        routes.retain(|(_, sink)| sink.send(bar).is_ok());
        if routes.is_empty() {
            self.routes.remove(symbol);
            true
        } else {
            false
        }
    }

    /// Drop every sink, ending all feeds; returns how many there were
    fn clear(&mut self) -> usize {
        let dropped = self.routes.values().map(Vec::len).sum();
        self.routes.clear();
        dropped
    }
}

struct StreamWorker {
    url: String,
    key_id: String,
    secret_key: String,
    command_rx: mpsc::UnboundedReceiver<StreamCommand>,
    routes: RouteTable,
}

impl StreamWorker {
    async fn run(mut self) {
        while let Some(command) = self.command_rx.recv().await {
            let StreamCommand::Subscribe {
                symbol,
                token,
                sink,
                ack,
            } = command
            else {
                // Nothing is routed while disconnected
                continue;
            };

            if ack.is_closed() {
                debug!("Subscription {} abandoned before connecting", token);
                continue;
            }

            let mut ws = match self.connect().await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("Failed to open market data stream: {}", e);
                    let _ = ack.send(Err(e));
                    continue;
                }
            };

            let served = match self.subscribe(&mut ws, symbol, token, sink, ack).await {
                Ok(()) => self.serve(&mut ws).await,
                Err(e) => Err(e),
            };
            if let Err(e) = served {
                warn!("Market data stream terminated: {}", e);
            }

            if let Err(e) = ws.close(None).await {
                debug!("Error closing market data stream: {}", e);
            }

            let dropped = self.routes.clear();
            info!("Market data stream closed, {} feeds ended", dropped);
        }

        debug!("Stream worker shutting down");
    }

    async fn connect(&self) -> Result<WsStream, AlpacaError> {
        info!("Connecting to market data stream at {}", self.url);
        let (mut ws, _) = connect_async(&self.url).await?;

        Self::expect_success(&mut ws, "connected").await?;

        let auth = serde_json::to_string(&StreamRequest::Auth {
            key: &self.key_id,
            secret: &self.secret_key,
        })?;
        ws.send(Message::Text(auth)).await?;

        Self::expect_success(&mut ws, "authenticated").await?;
        info!("Market data stream authenticated");
        Ok(ws)
    }

    async fn expect_success(ws: &mut WsStream, expected: &str) -> Result<(), AlpacaError> {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    for frame in parse_frames(&text)? {
                        match frame {
                            StreamFrame::Success { msg } if msg == expected => return Ok(()),
                            StreamFrame::Error { code, msg } => {
                                return Err(AlpacaError::AuthError(format!("{} {}", code, msg)));
                            }
                            _ => {}
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AlpacaError::ConnectionError(format!(
                        "stream closed while waiting for '{}'",
                        expected
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn serve(&mut self, ws: &mut WsStream) -> Result<(), AlpacaError> {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(StreamCommand::Subscribe { symbol, token, sink, ack }) => {
                            self.subscribe(ws, symbol, token, sink, ack).await?;
                        }
                        Some(StreamCommand::Unsubscribe { token }) => {
                            self.unsubscribe(ws, &token).await?;
                        }
                        None => return Ok(()),
                    }
                }

                message = ws.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.dispatch(ws, &text).await?,
                        Some(Ok(Message::Ping(payload))) => ws.send(Message::Pong(payload)).await?,
                        Some(Ok(Message::Close(frame))) => {
                            info!("Market data stream closed by server: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Route `sink` and answer the requester. A requester that already gave up
    /// (start timeout) gets its route rolled back so the feed does not outlive it.
    async fn subscribe(
        &mut self,
        ws: &mut WsStream,
        symbol: String,
        token: StreamToken,
        sink: BarSink,
        ack: oneshot::Sender<Result<(), AlpacaError>>,
    ) -> Result<(), AlpacaError> {
        if ack.is_closed() {
            debug!("Subscription {} abandoned, not routing {}", token, symbol);
            return Ok(());
        }

        let result = self.add_route(ws, &symbol, token.clone(), sink).await;
        let failed = result.is_err();

        if let Err(Ok(())) = ack.send(result) {
            debug!("Subscription {} abandoned after routing, rolling back", token);
            self.unsubscribe(ws, &token).await?;
        }

        if failed {
            return Err(AlpacaError::ConnectionError(
                "failed to write subscribe frame".to_string(),
            ));
        }
        Ok(())
    }

    async fn add_route(
        &mut self,
        ws: &mut WsStream,
        symbol: &str,
        token: StreamToken,
        sink: BarSink,
    ) -> Result<(), AlpacaError> {
        if self.routes.add(symbol, token, sink) {
            Self::send_request(ws, &StreamRequest::subscribe(symbol)).await?;
            debug!("Subscribed to bars for {}", symbol);
        }
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        ws: &mut WsStream,
        token: &StreamToken,
    ) -> Result<(), AlpacaError> {
        match self.routes.remove(token) {
            Some(symbol) => Self::release_symbol(ws, &symbol).await,
            None => {
                debug!("Unsubscribe for {} leaves the exchange subscription in place", token);
                Ok(())
            }
        }
    }

    async fn release_symbol(ws: &mut WsStream, symbol: &str) -> Result<(), AlpacaError> {
        Self::send_request(ws, &StreamRequest::unsubscribe(symbol)).await?;
        debug!("Unsubscribed from bars for {}", symbol);
        Ok(())
    }

    async fn send_request(
        ws: &mut WsStream,
        request: &StreamRequest<'_>,
    ) -> Result<(), AlpacaError> {
        let frame = serde_json::to_string(request)?;
        ws.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn dispatch(&mut self, ws: &mut WsStream, text: &str) -> Result<(), AlpacaError> {
        let frames = match parse_frames(text) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Skipping unparsable stream message: {}", e);
                return Ok(());
            }
        };

        for frame in frames {
            match frame {
                StreamFrame::Bar(wire) | StreamFrame::UpdatedBar(wire) => {
                    let symbol = wire.symbol.clone();
                    if self.routes.deliver(&symbol, Bar::from(wire)) {
                        Self::release_symbol(ws, &symbol).await?;
                    }
                }
                StreamFrame::Error { code, msg } => {
                    warn!("Market data stream error {}: {}", code, msg);
                }
                StreamFrame::Subscription { bars } => {
                    debug!("Active bar subscriptions: {:?}", bars);
                }
                StreamFrame::Success { .. } | StreamFrame::Other => {}
            }
        }
        Ok(())
    }
}
