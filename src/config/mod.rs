use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Host configuration for the plugin registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory mounted at `plugins://`; defaults to `plugins/` next to the executable
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,

    /// Scan `plugins://` for shared libraries
    #[serde(default = "default_true")]
    pub scan_dynamic: bool,

    /// Offer plugins linked into the binary
    #[serde(default = "default_true")]
    pub include_static: bool,

    /// Plugins to load at startup; empty loads everything that resolves
    #[serde(default)]
    pub load: Vec<Uuid>,

    /// Filter directives, e.g. `info` or `modloader::plugins=debug,warn`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_dir: None,
            scan_dynamic: true,
            include_static: true,
            load: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default location
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid YAML
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    /// Returns an error if serialization fails or the file cannot be written
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_yaml::to_string(self).context("Failed to serialize config")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path.as_ref(), contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default configuration path
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        Ok(home.join(".modloader").join("config.yaml"))
    }

    /// Directory to mount at `plugins://`
    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        if let Some(dir) = &self.plugins_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("plugins")))
            .unwrap_or_else(|| PathBuf::from("plugins"))
    }

    /// Log filter built from `log_level`; falls back to `info` if it does not parse
    #[must_use]
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new(default_log_level()))
    }
}
