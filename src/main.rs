use std::io::stdout;
use std::path::PathBuf;

use alchemist::config::{self, ConfigManager};
use alchemist::{logging, App, RunRequest};
use anyhow::{bail, Result};
use clap::Parser;
use ratatui::{
    backend::CrosstermBackend,
    crossterm::{
        execute,
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    },
    Terminal,
};
use tracing::{error, info};

const DEFAULT_PRESET: &str = "mix-test";

/// Run a build or test command and watch its output
#[derive(Parser, Debug)]
#[command(name = "alchemist", version, about)]
struct Cli {
    /// Configured command to run
    #[arg(short, long, conflicts_with = "command")]
    preset: Option<String>,

    /// Process name for an ad-hoc command
    #[arg(long, default_value = "command")]
    name: String,

    /// Sink receiving an ad-hoc command's output
    #[arg(long, default_value = "alchemist-output")]
    sink: String,

    /// Mode activated on the sink
    #[arg(long, default_value = "elixir")]
    mode: String,

    /// Directory holding config.json and the log file
    #[arg(long, env = "ALCHEMIST_CONFIG_DIR")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Write logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Ad-hoc command, after `--`
    #[arg(last = true)]
    command: Vec<String>,
}

impl Cli {
    fn request(&self, manager: &ConfigManager) -> Result<RunRequest> {
        if !self.command.is_empty() {
            let command = self.command.join(" ");
            if command.trim().is_empty() {
                bail!("Command must not be empty");
            }
            return Ok(RunRequest::new(command, &self.name, &self.sink).with_mode(&self.mode));
        }

        let name = self.preset.as_deref().unwrap_or(DEFAULT_PRESET);
        Ok(RunRequest::from_preset(name, manager.preset(name)?))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dir = cli.config.clone().unwrap_or_else(config::user_dir);
    let mut manager = ConfigManager::new(&dir);
    manager.load()?;
    let config = manager.get_config().clone();

    let log_path = logging::init(&dir, cli.verbose, cli.json_logs || config.ui.json_logs)?;
    info!(config = %manager.config_path().display(), log = %log_path.display(), "alchemist starting");

    let request = cli.request(&manager)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&config).await;
    app.start(request);
    let result = app.run(&mut terminal).await;
    app.runner().shutdown();

    // Restore the terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        ratatui::crossterm::cursor::Show
    )?;

    // Handle any final errors
    match result {
        Ok(()) => {
            info!(status = ?app.runner().last_status(), "alchemist exiting");
            Ok(())
        }
        Err(e) => {
            error!("Fatal: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}
