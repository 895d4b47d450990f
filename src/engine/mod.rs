//! Market view engine
//!
//! The engine runs as one task that owns a [`MarketViewController`]. User commands and
//! the outcomes of backend calls arrive on two channels and are applied one at a time,
//! so every state transition happens without interleaving. Rendering code talks to the
//! engine only through [`MarketViewHandle`] and the stream of [`ViewUpdate`]s.

pub mod controller;
pub mod debounce;
pub mod events;
pub mod lookup;
pub mod series;
pub mod stream_session;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::MarketBackend;
use crate::backend::types::Side;
use crate::config::EngineConfig;

pub use controller::{BarDisposition, MarketViewController};
pub use debounce::{DebounceOutcome, SearchDebouncer};
pub use events::{EngineCommand, EngineEvent, EngineStatus, ViewUpdate};
pub use lookup::{SymbolLookupClient, SymbolQuery};
pub use series::{ChartSeriesBuffer, MergeOutcome};
pub use stream_session::{StartAck, StreamHandle, StreamSession, StreamStatus};

/// The engine task
pub struct MarketView {
    controller: MarketViewController,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Cloneable command side of a running engine
#[derive(Clone)]
pub struct MarketViewHandle {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl MarketView {
    /// Build an engine together with its handle and view update stream
    pub fn new(
        backend: Arc<dyn MarketBackend>,
        config: &EngineConfig,
    ) -> (Self, MarketViewHandle, mpsc::UnboundedReceiver<ViewUpdate>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let controller = MarketViewController::new(backend, config, event_tx, update_tx);

        (
            Self {
                controller,
                command_rx,
                event_rx,
            },
            MarketViewHandle { command_tx },
            update_rx,
        )
    }

    /// Build and spawn an engine on the current runtime
    pub fn spawn(
        backend: Arc<dyn MarketBackend>,
        config: &EngineConfig,
    ) -> (
        MarketViewHandle,
        mpsc::UnboundedReceiver<ViewUpdate>,
        JoinHandle<()>,
    ) {
        let (engine, handle, updates) = Self::new(backend, config);
        let task = tokio::spawn(engine.run());
        (handle, updates, task)
    }

    /// Process commands and events until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Market view engine started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.controller.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            debug!("All market view handles dropped");
                            self.controller.shutdown();
                            break;
                        }
                    }
                }

                // The controller keeps a sender, so this never yields None
                Some(event) = self.event_rx.recv() => {
                    self.controller.handle_event(event);
                }
            }
        }

        info!("Market view engine stopped");
    }
}

impl MarketViewHandle {
    fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| anyhow::anyhow!("Market view engine stopped: {:?}", e.0))
    }

    /// Forward the current search box content
    pub fn input(&self, text: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::Input(text.into()))
    }

    pub fn select(&self, symbol: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::Select(symbol.into()))
    }

    pub fn stop(&self) -> Result<()> {
        self.send(EngineCommand::Stop)
    }

    pub fn place_order(&self, quantity: f64, side: Side) -> Result<()> {
        self.send(EngineCommand::PlaceOrder { quantity, side })
    }

    pub fn request_status(&self) -> Result<()> {
        self.send(EngineCommand::Status)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}
