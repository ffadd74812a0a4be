//! Global configuration.
//!
//! Loaded from `rwf.toml` in the working directory, if it exists.
//! Every setting has a default, so the file is optional.
//!
//! ### Example
//!
//! ```toml
//! [templates]
//! directory = "templates"
//! auto_reload = false
//! block_cache_size = 128
//!
//! [bytecode_cache]
//! address = "127.0.0.1:6379"
//! ```
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use std::env::var;
use std::fs::read_to_string;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Error, Debug)]
pub enum Error {
    #[error("config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config file not found")]
    Io(#[from] std::io::Error),

    #[error("config not found")]
    NoConfig,
}

/// Global configuration.
#[derive(Debug, Clone)]
pub struct Config {
    path: Option<PathBuf>,
    pub tty: bool,
    pub templates: TemplatesConfig,
    pub bytecode_cache: Option<BytecodeCacheConfig>,
}

/// The `[templates]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "TemplatesConfig::default_directory")]
    pub directory: PathBuf,
    #[serde(default = "TemplatesConfig::default_autoescape")]
    pub autoescape: bool,
    #[serde(default = "TemplatesConfig::default_auto_reload")]
    pub auto_reload: bool,
    /// Compiled templates kept by the environment. `0` disables the cache.
    #[serde(default = "TemplatesConfig::default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "TemplatesConfig::default_block_cache_size")]
    pub block_cache_size: usize,
    /// Seconds.
    #[serde(default = "TemplatesConfig::default_block_cache_ttl")]
    pub block_cache_ttl: u64,
    #[serde(default = "TemplatesConfig::default_context_cache_size")]
    pub context_cache_size: usize,
    /// Seconds.
    #[serde(default = "TemplatesConfig::default_context_cache_ttl")]
    pub context_cache_ttl: u64,
    #[serde(default = "TemplatesConfig::default_context_pool_size")]
    pub context_pool_size: usize,
    /// Fragments expected to be larger than this many bytes
    /// are rendered into one preallocated buffer.
    #[serde(default = "TemplatesConfig::default_fragment_buffer_threshold")]
    pub fragment_buffer_threshold: usize,
}

impl TemplatesConfig {
    fn default_directory() -> PathBuf {
        PathBuf::from("templates")
    }

    fn default_autoescape() -> bool {
        true
    }

    fn default_auto_reload() -> bool {
        #[cfg(debug_assertions)]
        return true;
        #[cfg(not(debug_assertions))]
        return false;
    }

    fn default_cache_size() -> usize {
        400
    }

    fn default_block_cache_size() -> usize {
        64
    }

    fn default_block_cache_ttl() -> u64 {
        600
    }

    fn default_context_cache_size() -> usize {
        128
    }

    fn default_context_cache_ttl() -> u64 {
        300
    }

    fn default_context_pool_size() -> usize {
        10
    }

    fn default_fragment_buffer_threshold() -> usize {
        1024
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            directory: Self::default_directory(),
            autoescape: Self::default_autoescape(),
            auto_reload: Self::default_auto_reload(),
            cache_size: Self::default_cache_size(),
            block_cache_size: Self::default_block_cache_size(),
            block_cache_ttl: Self::default_block_cache_ttl(),
            context_cache_size: Self::default_context_cache_size(),
            context_cache_ttl: Self::default_context_cache_ttl(),
            context_pool_size: Self::default_context_pool_size(),
            fragment_buffer_threshold: Self::default_fragment_buffer_threshold(),
        }
    }
}

/// The `[bytecode_cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytecodeCacheConfig {
    /// Redis URL, e.g. `redis://:password@host:6379/0`, or just `host:port`.
    pub address: String,
    #[serde(default = "BytecodeCacheConfig::default_prefix")]
    pub prefix: String,
}

impl BytecodeCacheConfig {
    fn default_prefix() -> String {
        "rwf-jinja".into()
    }
}

#[derive(Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    templates: TemplatesConfig,
    bytecode_cache: Option<BytecodeCacheConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            tty: std::io::stderr().is_terminal(),
            templates: TemplatesConfig::default(),
            bytecode_cache: None,
        }
        .env_overrides()
    }
}

impl Config {
    /// Load config from `rwf.toml` (or `Rwf.toml`) in the working directory.
    pub fn load() -> Result<Config, Error> {
        for name in ["rwf.toml", "Rwf.toml"] {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Err(Error::NoConfig)
    }

    /// Load config from a file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, Error> {
        let mut config = Self::from_str(&read_to_string(path.as_ref())?)?;
        config.path = Some(path.as_ref().to_owned());
        Ok(config)
    }

    /// Parse config from TOML.
    pub fn from_str(toml: &str) -> Result<Config, Error> {
        let file: ConfigFile = toml::from_str(toml)?;

        Ok(Self {
            path: None,
            tty: std::io::stderr().is_terminal(),
            templates: file.templates,
            bytecode_cache: file.bytecode_cache,
        }
        .env_overrides())
    }

    fn env_overrides(mut self) -> Self {
        if let Ok(directory) = var("RWF_TEMPLATES_DIR") {
            self.templates.directory = PathBuf::from(directory);
        }

        if let Ok(address) = var("RWF_BYTECODE_CACHE") {
            let prefix = self
                .bytecode_cache
                .take()
                .map(|cache| cache.prefix)
                .unwrap_or_else(BytecodeCacheConfig::default_prefix);
            self.bytecode_cache = Some(BytecodeCacheConfig { address, prefix });
        }

        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get() -> &'static Config {
        get_config()
    }

    /// Print the configuration at startup.
    pub fn log_info(&self) {
        match self.path {
            Some(ref path) => info!("configuration loaded from \"{}\"", path.display()),
            None => info!("no configuration file found, using defaults"),
        }

        info!(
            "templates in \"{}\", auto reload {}",
            self.templates.directory.display(),
            if self.templates.auto_reload { "on" } else { "off" }
        );

        if let Some(ref cache) = self.bytecode_cache {
            info!("bytecode cache at \"{}\"", cache.address);
        }
    }
}

pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(|| Config::load().unwrap_or_default())
}
