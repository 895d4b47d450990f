//! User Interface module
//!
//! Folds engine view updates into a renderable state and prints it to the terminal.

/// Simple CLI output functions
pub mod cli;

use crate::AppResult;
use crate::backend::types::{Bar, SessionId};
use crate::engine::{StreamStatus, ViewUpdate};

/// Number of bars printed by the chart view
pub const DEFAULT_CHART_ROWS: usize = 15;

/// What the terminal currently shows
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub query: Option<String>,
    pub candidates: Vec<String>,
    pub symbol: Option<String>,
    pub session_id: Option<SessionId>,
    pub stream: Option<StreamStatus>,
    pub bars: Vec<Bar>,
    pub last_error: Option<String>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one update into the state
    pub fn apply(&mut self, update: &ViewUpdate) {
        match update {
            ViewUpdate::Candidates { query, symbols } => {
                self.query = Some(query.clone());
                self.candidates = symbols.clone();
            }
            ViewUpdate::CandidatesCleared => {
                self.query = None;
                self.candidates.clear();
            }
            ViewUpdate::SearchFailed { query, error } => {
                self.query = Some(query.clone());
                self.candidates.clear();
                self.last_error = Some(error.to_string());
            }
            ViewUpdate::Chart {
                symbol,
                session_id,
                bars,
                ..
            } => {
                self.symbol = Some(symbol.clone());
                self.session_id = Some(*session_id);
                self.bars = bars.clone();
            }
            ViewUpdate::StreamState {
                symbol,
                session_id,
                status,
                message,
            } => {
                self.symbol = Some(symbol.clone());
                self.session_id = Some(*session_id);
                self.stream = Some(status.clone());
                if let StreamStatus::Failed(_) = status {
                    self.last_error = message.clone();
                }
            }
            ViewUpdate::OrderFailed { error, .. } => {
                self.last_error = Some(error.to_string());
            }
            ViewUpdate::OrderPlaced(_) | ViewUpdate::Status(_) => {}
        }
    }

    /// Candidate at a 1-based position of the last list
    pub fn candidate(&self, position: usize) -> Option<&str> {
        position
            .checked_sub(1)
            .and_then(|idx| self.candidates.get(idx))
            .map(String::as_str)
    }

    pub fn latest_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// Display welcome page for interactive mode
pub fn display_welcome_page(backend: &str) -> AppResult<()> {
    cli::display_banner(backend)
}
