//! Session Manager for interactive terminal session lifecycle management

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{MarketBackend, Side, build_backend};
use crate::cli::Cli;
use crate::config::Config;
use crate::engine::{MarketView, MarketViewHandle, ViewUpdate};
use crate::ui::{self, DEFAULT_CHART_ROWS, ViewState};

use super::command_router::{CommandRouter, InteractiveCommand};

/// Session state tracking
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

/// Session statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub commands_processed: u64,
    pub updates_received: u64,
    pub errors_encountered: u64,
}

/// Main session manager for interactive terminal
pub struct SessionManager {
    /// Application configuration
    config: Config,
    /// Session state
    state: SessionState,
    /// Session statistics
    stats: SessionStats,
    /// Backend shared with the engine
    backend: Arc<dyn MarketBackend>,
    /// Command router
    command_router: CommandRouter,
    /// Terminal view model
    view: ViewState,
    /// Engine handle, set once the session runs
    engine: Option<MarketViewHandle>,
    /// Engine task
    engine_task: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a new SessionManager; must be called from within a tokio runtime
    pub fn new(cli: &Cli, mut config: Config) -> Result<Self> {
        info!("Creating new SessionManager");

        cli.apply_overrides(&mut config);
        let backend = build_backend(&config).context("Failed to create market backend")?;

        Ok(Self {
            config,
            state: SessionState::Starting,
            stats: SessionStats::default(),
            backend,
            command_router: CommandRouter::new(),
            view: ViewState::new(),
            engine: None,
            engine_task: None,
        })
    }

    /// Start the engine and print the welcome page
    pub fn initialize(&mut self) -> Result<mpsc::UnboundedReceiver<ViewUpdate>> {
        info!("Initializing interactive session");

        let (handle, updates, task) = MarketView::spawn(self.backend.clone(), &self.config.engine);
        self.engine = Some(handle);
        self.engine_task = Some(task);

        ui::display_welcome_page(self.backend.name()).map_err(|e| anyhow::anyhow!(e))?;

        self.state = SessionState::Running;
        info!("Session initialized successfully");
        Ok(updates)
    }

    /// Run the main session loop until `/quit`, end of input or Ctrl-C
    pub async fn run(&mut self) -> Result<()> {
        let mut updates = self.initialize()?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        info!("Starting interactive session loop");

        while self.state == SessionState::Running {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C");
                    self.state = SessionState::ShuttingDown;
                }

                line = lines.next_line() => {
                    match line.context("Failed to read from stdin")? {
                        Some(line) => self.handle_line(&line)?,
                        None => {
                            info!("Input closed");
                            self.state = SessionState::ShuttingDown;
                        }
                    }
                }

                update = updates.recv() => {
                    match update {
                        Some(update) => self.handle_update(update)?,
                        None => {
                            warn!("Engine update channel closed");
                            self.state = SessionState::ShuttingDown;
                        }
                    }
                }
            }
        }

        self.shutdown().await
    }

    fn handle_line(&mut self, line: &str) -> Result<()> {
        match self.command_router.parse_interactive_command(line) {
            Ok(Some(command)) => self.handle_command(command),
            Ok(None) => Ok(()),
            Err(e) => {
                self.stats.errors_encountered += 1;
                println!("{}", e);
                Ok(())
            }
        }
    }

    /// Handle user command
    fn handle_command(&mut self, command: InteractiveCommand) -> Result<()> {
        debug!("Handling command: {:?}", command);
        self.stats.commands_processed += 1;

        let engine = self.engine.as_ref().context("Session not initialized")?;

        match command {
            InteractiveCommand::Search { text } => engine.input(text)?,
            InteractiveCommand::Select { symbol } => engine.select(symbol)?,
            InteractiveCommand::SelectCandidate { position } => {
                match self.view.candidate(position) {
                    Some(symbol) => engine.select(symbol)?,
                    None => println!("No candidate #{}", position),
                }
            }
            InteractiveCommand::Buy { quantity } => engine.place_order(quantity, Side::Buy)?,
            InteractiveCommand::Sell { quantity } => engine.place_order(quantity, Side::Sell)?,
            InteractiveCommand::Stop => engine.stop()?,
            InteractiveCommand::Chart => {
                ui::cli::display_chart(&self.view, DEFAULT_CHART_ROWS)
                    .map_err(|e| anyhow::anyhow!(e))?;
            }
            InteractiveCommand::Status => engine.request_status()?,
            InteractiveCommand::Help => {
                println!("MarketView commands:");
                for line in CommandRouter::help_messages() {
                    println!("{}", line);
                }
            }
            InteractiveCommand::Quit => self.state = SessionState::ShuttingDown,
        }
        Ok(())
    }

    fn handle_update(&mut self, update: ViewUpdate) -> Result<()> {
        self.stats.updates_received += 1;
        self.view.apply(&update);
        ui::cli::display_update(&update).map_err(|e| anyhow::anyhow!(e))
    }

    /// Stop the engine and wait for its task
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down session");
        self.state = SessionState::ShuttingDown;

        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.shutdown() {
                debug!("Engine already stopped: {}", e);
            }
        }

        if let Some(task) = self.engine_task.take() {
            if let Err(e) = task.await {
                error!("Engine task failed: {}", e);
            }
        }

        info!(
            "Session finished: {} commands, {} updates, {} errors",
            self.stats.commands_processed,
            self.stats.updates_received,
            self.stats.errors_encountered
        );
        self.state = SessionState::Terminated;
        Ok(())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}
