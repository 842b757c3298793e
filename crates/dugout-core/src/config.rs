// Configuration loading and parsing (dugout.toml, credentials.toml).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("no config at {path} and no default at {default} to start from")]
    MissingDefault { path: PathBuf, default: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Files seeded from `defaults/` on first run. The credentials template is
/// left for the user to fill in and copy by hand.
const SEEDED_FILES: &[&str] = &["dugout.toml"];
const CREDENTIALS_TEMPLATE: &str = "credentials.toml.example";

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ai: AiConfig,
    pub logging: LoggingConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// dugout.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire dugout.toml file.
#[derive(Debug, Clone, Deserialize)]
struct DugoutFile {
    server: ServerConfig,
    #[serde(default)]
    storage: StorageConfig,
    ai: AiConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Frontend origins allowed by CORS.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the JSON documents. When omitted, the platform data
    /// directory is used.
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl StorageConfig {
    /// Resolve the data directory, falling back to the per-user data
    /// directory (e.g. `~/.local/share/dugout`) and finally `./data`.
    pub fn resolve_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => directories::ProjectDirs::from("", "", "dugout")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("data")),
        }
    }
}

/// Which language-model service answers advisory requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiProvider::Ollama => write!(f, "ollama"),
            AiProvider::OpenAi => write!(f, "openai"),
            AiProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub ollama_url: String,
    pub preferred_model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "dugout=info,warn".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/dugout.toml` and (optionally)
/// `config/credentials.toml`, both relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- dugout.toml (required) ---
    let dugout_path = config_dir.join("dugout.toml");
    let dugout_text = read_file(&dugout_path)?;
    let dugout_file: DugoutFile =
        toml::from_str(&dugout_text).map_err(|e| ConfigError::ParseError {
            path: dugout_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: dugout_file.server,
        storage: dugout_file.storage,
        ai: dugout_file.ai,
        logging: dugout_file.logging,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/` from `defaults/` on first run. Returns the files written.
/// An existing file is never replaced, and `defaults/` is only needed for
/// files that are still missing.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");
    let mut seeded = Vec::new();

    for name in SEEDED_FILES {
        let target = config_dir.join(name);
        if target.exists() {
            continue;
        }
        let default = defaults_dir.join(name);
        if !default.is_file() {
            return Err(ConfigError::MissingDefault {
                path: target,
                default,
            });
        }
        fs::create_dir_all(&config_dir).map_err(|source| ConfigError::Io {
            path: config_dir.clone(),
            source,
        })?;
        if seed_file(&default, &target)? {
            info!("Created {} from defaults", target.display());
            seeded.push(target);
        }
    }

    if !config_dir.join("credentials.toml").exists()
        && defaults_dir.join(CREDENTIALS_TEMPLATE).is_file()
    {
        info!(
            "No credentials.toml; copy defaults/{} into config/ to use cloud providers",
            CREDENTIALS_TEMPLATE
        );
    }

    Ok(seeded)
}

/// Load config relative to the working directory, seeding defaults first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConfigError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Copy `from` to `to` unless `to` already exists. Returns whether it copied.
fn seed_file(from: &Path, to: &Path) -> Result<bool, ConfigError> {
    let mut dest = match OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(dest) => dest,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(source) => {
            return Err(ConfigError::Io {
                path: to.to_path_buf(),
                source,
            })
        }
    };
    let mut src = File::open(from).map_err(|source| ConfigError::Io {
        path: from.to_path_buf(),
        source,
    })?;
    io::copy(&mut src, &mut dest).map_err(|source| ConfigError::Io {
        path: to.to_path_buf(),
        source,
    })?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    let url = config.ai.ollama_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "ai.ollama_url".into(),
            message: format!("must be an http(s) URL, got {url:?}"),
        });
    }

    if config.ai.preferred_model.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "ai.preferred_model".into(),
            message: "must not be empty".into(),
        });
    }

    let positive_fields: &[(&str, u64)] = &[
        ("ai.max_tokens", u64::from(config.ai.max_tokens)),
        ("ai.request_timeout_secs", config.ai.request_timeout_secs),
    ];
    for (name, val) in positive_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
