//! Configuration management for devmon
//!
//! This module provides TOML persistence for the monitor source, default
//! enumeration filters, property extraction strategy and worker settings.

use crate::error::{Error, Result};
use crate::monitor::DEFAULT_SOURCE;
use crate::properties::{ExtractStrategy, PropertyExtractor};
use crate::watch::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// devmon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Monitor options
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Property extraction options
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Background worker options
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Monitor and enumeration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Event source: "udev" (processed events) or "kernel" (raw uevents)
    #[serde(default = "default_source_name")]
    pub source_name: String,
    /// Subsystems listed by default (empty = all)
    #[serde(default)]
    pub subsystems: Vec<String>,
}

/// Property extraction configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// "chain-walk" or "direct-lookup"
    #[serde(default)]
    pub strategy: ExtractStrategy,
}

/// Background worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Events buffered between the worker thread and the consumer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// Default value functions
fn default_source_name() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source_name: default_source_name(),
            subsystems: Vec::new(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Config {
    /// Get the default configuration directory
    ///
    /// Returns `~/.config/devmon` on Unix-like systems,
    /// or `%APPDATA%\devmon` on Windows.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(windows) {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| {
                    std::env::var("HOME").map(|home| PathBuf::from(home).join(".config"))
                })
                .unwrap_or_else(|_| PathBuf::from(".config"))
        };

        Ok(config_dir.join("devmon"))
    }

    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Result<Self> {
        let config_file = Self::default_path()?.join("config.toml");

        if !config_file.exists() {
            log::debug!("no config at {}, using defaults", config_file.display());
            return Ok(Self::default());
        }

        Self::load_from(&config_file)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_dir = Self::default_path()?;
        std::fs::create_dir_all(&config_dir)?;
        self.save_to(&config_dir.join("config.toml"))
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the library cannot use
    pub fn validate(&self) -> Result<()> {
        if self.monitor.source_name.is_empty() {
            return Err(Error::config("monitor.source_name must not be empty"));
        }
        if let Some(empty) = self.monitor.subsystems.iter().position(|s| s.is_empty()) {
            return Err(Error::config(format!(
                "monitor.subsystems[{}] must not be empty",
                empty
            )));
        }
        if self.worker.queue_capacity == 0 {
            return Err(Error::config("worker.queue_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Extractor configured by `extraction.strategy`
    pub fn extractor(&self) -> PropertyExtractor {
        PropertyExtractor::new(self.extraction.strategy)
    }
}
