use crate::domain::{config::RelayConfig, error::{RelayError, RelayResult}};
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::debug;

const CONFIG_DIR: &str = "ttyrelay";
const PROJECT_DIR: &str = ".ttyrelay";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: Option<PathBuf>,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> Self {
        Self {
            global_config_path: Self::get_global_config_path(),
            project_config_path: Self::find_project_config_path(),
        }
    }

    /// Configuration manager reading only `path`.
    pub fn with_file(path: PathBuf) -> Self {
        Self {
            global_config_path: None,
            project_config_path: Some(path),
        }
    }

    /// Load configuration, project settings overriding global ones key by key
    pub fn load_config(&self) -> RelayResult<RelayConfig> {
        let mut merged = Table::new();

        for path in [&self.global_config_path, &self.project_config_path]
            .into_iter()
            .flatten()
        {
            if path.exists() {
                debug!("loading configuration from {}", path.display());
                merge_tables(&mut merged, read_table(path)?);
            }
        }

        Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| RelayError::Config {
                message: format!("Invalid configuration: {}", e),
            })
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> RelayResult<RelayConfig> {
        let content = fs::read_to_string(path).map_err(|e| RelayError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| RelayError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &RelayConfig) -> RelayResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| RelayError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| RelayError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create default project configuration under `path`
    pub fn init_project_config(&self, path: &Path) -> RelayResult<PathBuf> {
        let config_dir = path.join(PROJECT_DIR);
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            return Err(RelayError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        fs::create_dir_all(&config_dir).map_err(|e| RelayError::Config {
            message: format!("Failed to create {} directory: {}", PROJECT_DIR, e),
        })?;

        self.save_config_to_path(&config_file, &RelayConfig::default())?;
        Ok(config_file)
    }

    /// Write the default configuration to the global path
    pub fn init_global_config(&self) -> RelayResult<PathBuf> {
        let config_file = self.global_config_path.clone().ok_or_else(|| RelayError::Config {
            message: "No home directory for the global configuration".to_string(),
        })?;
        if let Some(dir) = config_file.parent() {
            fs::create_dir_all(dir).map_err(|e| RelayError::Config {
                message: format!("Failed to create {}: {}", dir.display(), e),
            })?;
        }

        self.save_config_to_path(&config_file, &RelayConfig::default())?;
        Ok(config_file)
    }

    /// Get global configuration path
    fn get_global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut path = current_dir.as_path();

        loop {
            let config_path = path.join(PROJECT_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn read_table(path: &Path) -> RelayResult<Table> {
    let content = fs::read_to_string(path).map_err(|e| RelayError::Config {
        message: format!("Failed to read config file {}: {}", path.display(), e),
    })?;

    content.parse::<Table>().map_err(|e| RelayError::Config {
        message: format!("Failed to parse config file {}: {}", path.display(), e),
    })
}

/// Overlay `overlay` onto `base`, descending into nested tables.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(nested)) => merge_tables(existing, nested),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
