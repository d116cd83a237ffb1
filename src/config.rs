//! Knowledge-base configuration, loaded from TOML.
//!
//! Configuration is passed explicitly at construction; nothing here is
//! process-global.
//!
//! ```toml
//! default_namespace = "oro"
//!
//! [memory]
//! sweep_period_ms = 500
//! time_unit_ms = 1000
//!
//! [watch]
//! channel_capacity = 1024
//!
//! [agents]
//! max_agents = 64
//! agent_class = "Agent"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KbResult, ValidationError};
use crate::memory::MemoryConfig;
use crate::term::Namespaces;

fn default_namespace() -> String {
    "oro".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_agents() -> usize {
    64
}

fn default_agent_class() -> String {
    "Agent".to_string()
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig { reason: reason.into() }
}

/// Watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Capacity of channels created by `KnowledgeBase::subscribe`.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Agent registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on tracked agents, `myself` included.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Class whose new instances get their own model.
    #[serde(default = "default_agent_class")]
    pub agent_class: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            agent_class: default_agent_class(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Prefix given to unprefixed tokens.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    /// `[memory]` table.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// `[watch]` table.
    #[serde(default)]
    pub watch: WatchConfig,
    /// `[agents]` table.
    #[serde(default)]
    pub agents: AgentConfig,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            default_namespace: default_namespace(),
            memory: MemoryConfig::default(),
            watch: WatchConfig::default(),
            agents: AgentConfig::default(),
        }
    }
}

impl KnowledgeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> KbResult<Self> {
        let cfg: Self = toml::from_str(raw).map_err(|e| invalid(format!("failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> KbResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| invalid(format!("failed to read config at {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Checks every value; the first bad one is reported.
    ///
    /// # Errors
    /// `InvalidConfig` naming the offending key.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ns = self.default_namespace.trim();
        if ns.is_empty() || ns.contains(':') || ns.contains(char::is_whitespace) {
            return Err(invalid(format!(
                "default_namespace '{}' must be a non-empty prefix without ':' or spaces",
                self.default_namespace
            )));
        }
        self.memory.validate()?;
        if self.watch.channel_capacity == 0 {
            return Err(invalid("watch.channel_capacity must be greater than zero"));
        }
        if self.agents.max_agents == 0 {
            return Err(invalid("agents.max_agents must be greater than zero"));
        }
        if self.agents.agent_class.trim().is_empty() {
            return Err(invalid("agents.agent_class must not be empty"));
        }
        Ok(())
    }

    /// Namespaces built from `default_namespace`.
    #[must_use]
    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(self.default_namespace.trim())
    }
}
