//! Configuration for the ingest pipeline
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every section is optional; missing sections fall back to the built-in
//! device bindings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::decoder::DecoderKind;
use crate::registry::ProfileMatch;

/// Complete ingest configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub registry: RegistryConfig,
}

/// Batch processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Decode tasks allowed in flight at once
    pub workers: usize,
    /// Envelopes handed to one blocking decode task
    pub chunk_size: usize,
    /// Drop repeated deliveries of the same uplink
    pub deduplicate: bool,
    /// Treat any error-class skip as a failed run
    pub strict: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            chunk_size: 256,
            deduplicate: true,
            strict: false,
        }
    }
}

/// Device profile and port bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub profiles: Vec<ProfileRule>,
    pub ports: Vec<PortBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Exact,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRule {
    pub pattern: String,
    #[serde(rename = "match", default = "default_match_mode")]
    pub mode: MatchMode,
    pub decoder: DecoderKind,
}

fn default_match_mode() -> MatchMode {
    MatchMode::Exact
}

impl ProfileRule {
    fn new(pattern: &str, mode: MatchMode, decoder: DecoderKind) -> Self {
        Self {
            pattern: pattern.to_string(),
            mode,
            decoder,
        }
    }

    pub fn to_match(&self) -> ProfileMatch {
        match self.mode {
            MatchMode::Exact => ProfileMatch::Exact(self.pattern.clone()),
            MatchMode::Contains => ProfileMatch::Contains(self.pattern.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: u8,
    pub decoder: DecoderKind,
}

impl PortBinding {
    pub fn new(port: u8, decoder: DecoderKind) -> Self {
        Self { port, decoder }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            profiles: vec![
                ProfileRule::new("SW3L", MatchMode::Exact, DecoderKind::Sw3l),
                ProfileRule::new("Makerfabs", MatchMode::Contains, DecoderKind::MakerfabsSoil),
                ProfileRule::new("DDS75", MatchMode::Contains, DecoderKind::Dds75Lb),
                ProfileRule::new("EM500", MatchMode::Contains, DecoderKind::Em500Udl),
            ],
            ports: vec![
                PortBinding::new(2, DecoderKind::Dds75Lb),
                PortBinding::new(85, DecoderKind::Em500Udl),
            ],
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Environment variables override config file values:
    /// - LORAWAN_INGEST_WORKERS: Override decode worker count
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml(&config_str)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        Ok(config)
    }

    /// Built-in defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse, apply environment overrides and validate
    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text).context("Failed to parse TOML")?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply LORAWAN_INGEST_WORKERS, if set
    pub fn apply_env(&mut self) -> Result<()> {
        self.override_workers(std::env::var("LORAWAN_INGEST_WORKERS").ok().as_deref())
    }

    fn override_workers(&mut self, value: Option<&str>) -> Result<()> {
        if let Some(workers) = value {
            tracing::info!(workers = %workers, "Using LORAWAN_INGEST_WORKERS from environment");
            self.ingest.workers = workers
                .parse()
                .with_context(|| format!("Invalid LORAWAN_INGEST_WORKERS: {}", workers))?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.ingest.workers == 0 {
            anyhow::bail!("ingest.workers must be greater than 0");
        }
        if self.ingest.chunk_size == 0 {
            anyhow::bail!("ingest.chunk_size must be greater than 0");
        }

        // LoRaWAN application ports are 1..=223
        let mut seen = HashSet::new();
        for binding in &self.registry.ports {
            if !(1..=223).contains(&binding.port) {
                anyhow::bail!("Invalid application port: {} (must be 1..=223)", binding.port);
            }
            if !seen.insert(binding.port) {
                anyhow::bail!("Port {} is bound more than once", binding.port);
            }
        }

        for rule in &self.registry.profiles {
            if rule.pattern.is_empty() {
                anyhow::bail!("Profile pattern for {:?} must not be empty", rule.decoder);
            }
        }

        Ok(())
    }
}
