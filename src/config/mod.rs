use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Runner configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Process runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// UI settings
    #[serde(default)]
    pub ui: UiConfig,

    /// Named commands
    #[serde(default = "default_presets")]
    pub presets: HashMap<String, Preset>,
}

/// Process runner settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Delay between interrupt and forced termination when replacing a run
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Shell used to run commands
    #[serde(default = "default_shell")]
    pub shell: String,

    /// TERM exported to processes
    #[serde(default = "default_term")]
    pub term: String,

    /// Extra environment for processes
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Files that mark a project root, strongest first
    #[serde(default = "default_project_markers")]
    pub project_markers: Vec<String>,

    /// Ask before killing a running process of the same name
    #[serde(default = "default_confirm_on_exit")]
    pub confirm_on_exit: bool,
}

/// UI settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UiConfig {
    /// Show status bar
    #[serde(default = "default_show_status_bar")]
    pub show_status_bar: bool,

    /// Keep the view on the newest output
    #[serde(default = "default_follow_output")]
    pub follow_output: bool,

    /// Write logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

/// A named command
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Preset {
    pub command: String,
    pub sink: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Preset {
    pub fn new(command: &str, sink: &str, mode: &str) -> Self {
        Self {
            command: command.to_string(),
            sink: sink.to_string(),
            mode: mode.to_string(),
        }
    }
}

// Default values
fn default_kill_grace_ms() -> u64 {
    1000
}
fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".to_string()
    } else {
        "sh".to_string()
    }
}
fn default_term() -> String {
    "xterm-256color".to_string()
}
fn default_project_markers() -> Vec<String> {
    vec!["mix.exs".to_string(), ".git".to_string()]
}
fn default_confirm_on_exit() -> bool {
    true
}
fn default_show_status_bar() -> bool {
    true
}
fn default_follow_output() -> bool {
    true
}
fn default_mode() -> String {
    "elixir".to_string()
}
fn default_presets() -> HashMap<String, Preset> {
    let mut presets = HashMap::new();
    presets.insert(
        "mix-test".to_string(),
        Preset::new("mix test", "alchemist-mix-test", "elixir"),
    );
    presets.insert(
        "mix-compile".to_string(),
        Preset::new("mix compile", "alchemist-mix-compile", "elixir"),
    );
    presets.insert(
        "mix-deps-get".to_string(),
        Preset::new("mix deps.get", "alchemist-mix", "elixir"),
    );
    presets.insert(
        "iex".to_string(),
        Preset::new("iex -S mix", "alchemist-iex", "elixir"),
    );
    presets
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            ui: UiConfig::default(),
            presets: default_presets(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            kill_grace_ms: default_kill_grace_ms(),
            shell: default_shell(),
            term: default_term(),
            env: HashMap::new(),
            project_markers: default_project_markers(),
            confirm_on_exit: default_confirm_on_exit(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_status_bar: default_show_status_bar(),
            follow_output: default_follow_output(),
            json_logs: false,
        }
    }
}

/// Default directory for config and logs
pub fn user_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("alchemist")
}

/// Configuration manager
pub struct ConfigManager {
    /// The config
    config: Config,

    /// The path to the config file
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager
    pub fn new(config_dir: &Path) -> Self {
        let config_path = config_dir.join("config.json");

        Self {
            config: Config::default(),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config
    pub fn load(&mut self) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = self.config_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }

        // Load config if it exists, otherwise use defaults
        if self.config_path.exists() {
            let config_str = fs::read_to_string(&self.config_path)?;
            let mut config: Config = serde_json::from_str(&config_str)
                .map_err(|e| anyhow!("Failed to parse config: {}", e))?;

            // User presets add to and override the shipped ones
            let mut presets = default_presets();
            presets.extend(config.presets);
            config.presets = presets;

            self.config = config;
        }

        Ok(())
    }

    /// Save the config
    pub fn save(&self) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, config_str)?;
        Ok(())
    }

    /// Get the config
    pub fn get_config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the config
    pub fn get_config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Look up a preset by name
    pub fn preset(&self, name: &str) -> Result<&Preset> {
        self.config
            .presets
            .get(name)
            .ok_or_else(|| anyhow!("Unknown preset: {}", name))
    }

    /// Update a setting
    pub fn update_setting(&mut self, path: &str, value: serde_json::Value) -> Result<()> {
        match path {
            "runner.killGraceMs" => {
                self.config.runner.kill_grace_ms =
                    value.as_u64().ok_or_else(|| anyhow!("Expected number"))?;
            }
            "runner.shell" => {
                self.config.runner.shell = value
                    .as_str()
                    .ok_or_else(|| anyhow!("Expected string"))?
                    .to_string();
            }
            "runner.term" => {
                self.config.runner.term = value
                    .as_str()
                    .ok_or_else(|| anyhow!("Expected string"))?
                    .to_string();
            }
            "runner.confirmOnExit" => {
                self.config.runner.confirm_on_exit =
                    value.as_bool().ok_or_else(|| anyhow!("Expected boolean"))?;
            }
            "ui.showStatusBar" => {
                self.config.ui.show_status_bar =
                    value.as_bool().ok_or_else(|| anyhow!("Expected boolean"))?;
            }
            "ui.followOutput" => {
                self.config.ui.follow_output =
                    value.as_bool().ok_or_else(|| anyhow!("Expected boolean"))?;
            }
            _ => {
                return Err(anyhow!("Unsupported setting path: {}", path));
            }
        }

        Ok(())
    }

    /// Get a setting by path
    pub fn get_setting(&self, path: &str) -> Result<serde_json::Value> {
        match path {
            "runner.killGraceMs" => Ok(serde_json::json!(self.config.runner.kill_grace_ms)),
            "runner.shell" => Ok(serde_json::json!(self.config.runner.shell)),
            "runner.term" => Ok(serde_json::json!(self.config.runner.term)),
            "runner.confirmOnExit" => Ok(serde_json::json!(self.config.runner.confirm_on_exit)),
            "ui.showStatusBar" => Ok(serde_json::json!(self.config.ui.show_status_bar)),
            "ui.followOutput" => Ok(serde_json::json!(self.config.ui.follow_output)),
            _ => Err(anyhow!("Unsupported setting path: {}", path)),
        }
    }
}
