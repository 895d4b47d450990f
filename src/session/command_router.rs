//! Command Router for interactive command processing

use anyhow::Result;

/// Interactive commands for the terminal session
#[derive(Debug, Clone, PartialEq)]
pub enum InteractiveCommand {
    /// Plain text typed into the search box; empty clears the candidates
    Search { text: String },
    /// Select a symbol by ticker
    Select { symbol: String },
    /// Select the n-th candidate (1-based) of the last search
    SelectCandidate { position: usize },
    /// Market buy of the selected symbol
    Buy { quantity: f64 },
    /// Market sell of the selected symbol
    Sell { quantity: f64 },
    /// Stop the live stream
    Stop,
    /// Print the chart table
    Chart,
    /// Show engine status and counters
    Status,
    Help,
    /// Quit the application
    Quit,
}

const HELP_LINES: [&str; 9] = [
    "  <text>                - Search symbols (empty line clears)",
    "  /select <symbol|n>    - Stream a symbol or the n-th candidate",
    "  /buy <quantity>       - Market buy of the selected symbol",
    "  /sell <quantity>      - Market sell of the selected symbol",
    "  /stop                 - Stop the live stream",
    "  /chart                - Show the chart",
    "  /status               - Show engine status",
    "  /help                 - Show this help",
    "  /quit                 - Exit the application",
];

/// Command router for processing interactive commands
#[derive(Debug, Default)]
pub struct CommandRouter;

impl CommandRouter {
    /// Create a new CommandRouter
    pub fn new() -> Self {
        Self
    }

    /// Parse interactive command from one input line
    pub fn parse_interactive_command(&self, input: &str) -> Result<Option<InteractiveCommand>> {
        let input = input.trim();

        if !input.starts_with('/') {
            return Ok(Some(InteractiveCommand::Search {
                text: input.to_string(),
            }));
        }

        let parts: Vec<&str> = input.split_whitespace().collect();

        match parts[0] {
            "/select" | "/s" => {
                if parts.len() != 2 {
                    return Err(anyhow::anyhow!("Usage: /select <symbol|n>"));
                }
                match parts[1].parse::<usize>() {
                    Ok(position) => Ok(Some(InteractiveCommand::SelectCandidate { position })),
                    Err(_) => Ok(Some(InteractiveCommand::Select {
                        symbol: parts[1].to_string(),
                    })),
                }
            }
            "/buy" => {
                let quantity = Self::parse_quantity(&parts, "/buy")?;
                Ok(Some(InteractiveCommand::Buy { quantity }))
            }
            "/sell" => {
                let quantity = Self::parse_quantity(&parts, "/sell")?;
                Ok(Some(InteractiveCommand::Sell { quantity }))
            }
            "/stop" => Ok(Some(InteractiveCommand::Stop)),
            "/chart" => Ok(Some(InteractiveCommand::Chart)),
            "/status" => Ok(Some(InteractiveCommand::Status)),
            "/help" | "/?" => Ok(Some(InteractiveCommand::Help)),
            "/quit" | "/exit" | "/q" => Ok(Some(InteractiveCommand::Quit)),
            "/" => Ok(None),
            _ => Err(anyhow::anyhow!(
                "Unknown command: {}. Type '/help' for available commands.",
                parts[0]
            )),
        }
    }

    fn parse_quantity(parts: &[&str], command: &str) -> Result<f64> {
        if parts.len() != 2 {
            return Err(anyhow::anyhow!("Usage: {} <quantity>", command));
        }
        parts[1]
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("Invalid quantity: {}", parts[1]))
    }

    /// Interactive command help
    pub fn help_messages() -> &'static [&'static str] {
        &HELP_LINES
    }
}
