use colored::Colorize;
use marketview::{
    AppResult,
    cli::{Cli, Commands},
    config::Config,
    init_logging,
    session::{SessionManager, run_demo},
};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration before logging so the log file location can come from it
    let mut config = match Config::load(&cli.config_file) {
        Ok(config) => config,
        Err(e) if matches!(cli.command(), Commands::Config { .. }) => {
            // Still allow `config reset` to repair a broken file
            eprintln!("{} {:#}", "Ignoring unreadable configuration:".yellow(), e);
            Config::from_env()
        }
        Err(e) => {
            eprintln!("{} {:#}", "Failed to load configuration:".red(), e);
            return Err(e.into());
        }
    };
    cli.apply_overrides(&mut config);

    // Initialize logging
    let _log_guard = init_logging(&cli.effective_log_level(&config), &config.log.file_path)?;

    tracing::info!("MarketView starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command() {
        Commands::Interactive => {
            if let Err(e) = config.validate() {
                eprintln!("{} {:#}", "Invalid configuration:".red(), e);
                return Err(e.into());
            }

            // Create session manager
            let mut session_manager = SessionManager::new(&cli, config)?;

            // Run interactive session
            session_manager.run().await?;
        }
        Commands::Config { action } => {
            Config::handle_command(&action, &cli.config_file)?;
        }
        Commands::Demo => {
            run_demo(&config.engine).await?;
        }
    }

    tracing::info!("MarketView exiting");
    Ok(())
}
