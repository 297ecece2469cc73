use std::path::PathBuf;

/// Standardized application directories for AgentRelay.
///
/// - User-level config: `<config>/agentrelay/config.toml`
/// - User-level data: session store and log files
pub struct AppPaths;

impl AppPaths {
    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", "agentrelay")
    }

    /// Return the user-level config directory (platform-specific)
    pub fn user_config_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|d| d.config_dir().to_path_buf())
    }

    /// Return the user-level data directory (platform-specific)
    pub fn user_data_dir() -> Option<PathBuf> {
        Self::project_dirs().map(|d| d.data_dir().to_path_buf())
    }

    pub fn config_file() -> Option<PathBuf> {
        Self::user_config_dir().map(|d| d.join("config.toml"))
    }

    pub fn session_store() -> Option<PathBuf> {
        Self::user_data_dir().map(|d| d.join("sessions.json"))
    }

    pub fn log_dir() -> Option<PathBuf> {
        Self::user_data_dir().map(|d| d.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_their_directories() {
        if let (Some(config_dir), Some(config_file)) =
            (AppPaths::user_config_dir(), AppPaths::config_file())
        {
            assert_eq!(config_file, config_dir.join("config.toml"));
        }
        if let (Some(data_dir), Some(store), Some(logs)) = (
            AppPaths::user_data_dir(),
            AppPaths::session_store(),
            AppPaths::log_dir(),
        ) {
            assert_eq!(store, data_dir.join("sessions.json"));
            assert!(logs.starts_with(&data_dir));
        }
    }
}
