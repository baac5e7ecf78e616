use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub assistant: AssistantConfig,
    pub classifier: ClassifierConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from default path (~/.config/corridor-lens/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("corridor-lens")
            .join("config.toml")
    }

    /// Data directory for the transaction snapshot and REPL history.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("corridor-lens")
    }

    /// Resolved path of the transaction snapshot.
    pub fn transactions_path(&self) -> PathBuf {
        self.data
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("transactions.json"))
    }
}

/// Transaction snapshot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// JSON file holding the transaction array (None = data_dir/transactions.json).
    pub path: Option<PathBuf>,
    /// Anchor for the 7d / 30d windows. None = latest transaction date in the snapshot.
    pub reference_date: Option<NaiveDate>,
}

/// Assistant session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Upper bound on a single question's resolution, in seconds.
    pub resolve_timeout_secs: u64,
    /// Maximum number of messages returned by the history view of a session.
    pub max_history: usize,
    /// Sessions kept in memory before the stalest idle one is evicted.
    pub max_sessions: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_secs: 10,
            max_history: 200,
            max_sessions: 256,
        }
    }
}

/// Optional model-assisted intent classification. Disabled unless explicitly enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Environment variable to read the API key from when `api_key` is unset.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "http://localhost:11434/v1".into(),
            model: "llama3".into(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".into()),
            timeout_secs: 5,
        }
    }
}

impl ClassifierConfig {
    /// API key from config, falling back to the configured environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Enable CORS.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            cors: true,
        }
    }
}
