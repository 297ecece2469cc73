use std::path::PathBuf;
use std::time::Duration;

use agentrelay_core::config::AppConfig;
use clap::{Parser, Subcommand};

/// Chat shell that launches the local AgentRelay worker and streams its runs.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Address the worker binds to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port the worker is asked to listen on
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Start the worker without network access to the model provider
    #[arg(long, global = true)]
    pub offline: bool,

    /// Let the worker accept unauthenticated runs
    #[arg(long, global = true)]
    pub allow_guest: bool,

    /// Run without any UI, only the worker and its logs
    #[arg(long, visible_alias = "no-ui", global = true)]
    pub headless: bool,

    /// Executable used to launch the worker (defaults to $AGENTRELAY_WORKER, then python)
    #[arg(long, alias = "python", value_name = "PATH", global = true)]
    pub worker: Option<PathBuf>,

    /// Script passed to the worker executable ahead of its arguments
    #[arg(long, value_name = "PATH", global = true)]
    pub entrypoint: Option<PathBuf>,

    /// Path to the session file (defaults to the platform data directory)
    #[arg(long, env = "AGENTRELAY_STORE", value_name = "PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Path to the configuration file (TOML format)
    #[arg(long, env = "AGENTRELAY_CONFIG", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the worker to report readiness
    #[arg(long, default_value = "30", global = true)]
    pub ready_timeout: u64,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Layer command-line flags over a loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        let runtime = &mut config.runtime;
        if let Some(host) = &self.host {
            runtime.host.clone_from(host);
        }
        if let Some(port) = self.port {
            runtime.port = port;
        }
        runtime.offline |= self.offline;
        runtime.allow_guest |= self.allow_guest;
        runtime.headless |= self.headless;
        if let Some(worker) = &self.worker {
            runtime.worker_executable_path = Some(worker.clone());
        }
        if let Some(entrypoint) = &self.entrypoint {
            config.worker.entrypoint = Some(entrypoint.clone());
        }
        if let Some(store) = &self.store {
            config.store.path = Some(store.clone());
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Launch the worker and forward its output until interrupted (default)
    Serve {
        /// Emit worker events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Send one message and stream the reply to stdout
    Send {
        /// Message text
        prompt: String,
        /// Session to send into (ID or unique prefix); defaults to the active session
        #[arg(long)]
        session: Option<String>,
        /// Always start a new session
        #[arg(long, conflicts_with = "session")]
        new: bool,
        /// Emit run updates as JSON lines instead of plain text
        #[arg(long)]
        json: bool,
    },
    /// Query the worker's status endpoint
    Status {
        /// Print the raw status document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage the DeepSeek provider settings held by the worker
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },
    /// Session management commands
    Session {
        #[command(subcommand)]
        session_command: SessionCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsCommands {
    /// Show the current settings
    Show,
    /// Update the API key and/or base URL
    Set {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Clear all stored settings
    Reset,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SessionCommands {
    /// List all sessions
    List,
    /// Create a new session and make it active
    Create {
        /// Session title
        #[arg(default_value = "New chat")]
        title: String,
    },
    /// Show a session and its messages
    Show {
        /// Session ID (or unique prefix) to show
        session_id: String,
    },
    /// Rename a session
    Rename {
        session_id: String,
        title: String,
    },
    /// Make a session the active one
    Select {
        session_id: String,
    },
    /// Delete a session
    Delete {
        /// Session ID (or unique prefix) to delete
        session_id: String,
        /// Force deletion without confirmation
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrelay_core::config::DEFAULT_PORT;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("agentrelay").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = parse(&[]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.ready_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn no_ui_is_an_alias_for_headless() {
        assert!(parse(&["--no-ui"]).headless);
        let cli = parse(&["serve", "--headless", "--json"]);
        assert!(cli.headless);
        assert_eq!(cli.command, Some(Commands::Serve { json: true }));
    }

    #[test]
    fn python_is_an_alias_for_worker() {
        let cli = parse(&["--python", "/usr/bin/python3"]);
        assert_eq!(cli.worker, Some(PathBuf::from("/usr/bin/python3")));
    }

    #[test]
    fn flags_override_loaded_config() {
        let cli = parse(&[
            "--port",
            "6001",
            "--offline",
            "--entrypoint",
            "worker/main.py",
            "--store",
            "/tmp/sessions.json",
            "status",
        ]);
        let mut config = AppConfig::default();
        config.runtime.host = "0.0.0.0".to_string();
        cli.apply_overrides(&mut config);

        assert_eq!(config.runtime.host, "0.0.0.0");
        assert_eq!(config.runtime.port, 6001);
        assert!(config.runtime.offline);
        assert!(!config.runtime.allow_guest);
        assert_eq!(config.worker.entrypoint, Some(PathBuf::from("worker/main.py")));
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/sessions.json")));
        assert_eq!(cli.command, Some(Commands::Status { json: false }));
    }

    #[test]
    fn config_values_survive_when_flags_are_absent() {
        let mut config = AppConfig::default();
        config.runtime.offline = true;
        parse(&[]).apply_overrides(&mut config);
        assert!(config.runtime.offline);
        assert_eq!(config.runtime.port, DEFAULT_PORT);
    }

    #[test]
    fn send_rejects_session_with_new() {
        let result = Cli::try_parse_from(["agentrelay", "send", "hi", "--new", "--session", "abc"]);
        assert!(result.is_err());
    }

    #[test]
    fn settings_set_takes_both_fields() {
        let cli = parse(&[
            "settings",
            "set",
            "--api-key",
            "sk-1",
            "--base-url",
            "https://api.example.com",
        ]);
        assert_eq!(
            cli.command,
            Some(Commands::Settings {
                action: SettingsCommands::Set {
                    api_key: Some("sk-1".to_string()),
                    base_url: Some("https://api.example.com".to_string()),
                }
            })
        );
    }
}
