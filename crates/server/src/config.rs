//! Service configuration.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults
//! 2. An optional YAML file
//! 3. Environment variables prefixed with `MOVIE_BUS__`, nested with `__`
//!    (e.g. `MOVIE_BUS__TOPICS__COMMANDS=movies-v2`)

use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MOVIE_BUS";

/// Names of the four channels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub commands: String,
    pub responses: String,
    pub errors: String,
    pub ratings: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            commands: "movies".to_string(),
            responses: "movie-response-topic".to_string(),
            errors: "error-topic".to_string(),
            ratings: "ratings".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub topics: TopicConfig,
    /// Partitions per topic when the service creates them
    pub partitions: usize,
    /// Consumer group shared by command workers
    pub consumer_group: String,
    /// Default bound on how long a caller waits for a search
    pub search_timeout_ms: u64,
    /// Number of error messages the error listener keeps for display
    pub error_history: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            topics: TopicConfig::default(),
            partitions: 3,
            consumer_group: "movie-workers".to_string(),
            search_timeout_ms: 2_000,
            error_history: 64,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Parse configuration from YAML text, without consulting the environment
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_search_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.search_timeout_ms = timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.topics.commands, "movies");
        assert_eq!(config.topics.responses, "movie-response-topic");
        assert_eq!(config.topics.errors, "error-topic");
        assert_eq!(config.search_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "partitions: 8\ntopics:\n  commands: movies-v2\n";
        let config = ServiceConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.partitions, 8);
        assert_eq!(config.topics.commands, "movies-v2");
        assert_eq!(config.topics.ratings, "ratings");
        assert_eq!(config.error_history, 64);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("movie-bus-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "search_timeout_ms: 250\nconsumer_group: test-workers\n").unwrap();

        let config = ServiceConfig::load(path.to_str()).unwrap();
        assert_eq!(config.search_timeout_ms, 250);
        assert_eq!(config.consumer_group, "test-workers");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ServiceConfig::load(Some("/nonexistent/movie-bus.yaml")).is_err());
    }

    #[test]
    fn test_builders() {
        let config = ServiceConfig::default()
            .with_partitions(1)
            .with_search_timeout_ms(100);
        assert_eq!(config.partitions, 1);
        assert_eq!(config.search_timeout(), Duration::from_millis(100));
    }
}
