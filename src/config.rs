//! Configuration for leadflow, read from `leadflow.toml`.
//!
//! Every section is optional and falls back to defaults. When neither
//! `[[stages]]` nor `[[guards]]` is given, the built-in sales pipeline and its
//! guards are used.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! path = ".leadflow/leadflow.db"
//! read_attempts = 3
//! read_retry_delay_ms = 250
//!
//! [server]
//! port = 3150
//! dev_mode = false
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [[stages]]
//! id = "new"
//! name = "New Lead"
//!
//! [[guards]]
//! stage = "proposal"
//! name = "audit-completed"
//! message = "Complete an audit before sending a proposal"
//! remediation = "/audits/new?lead={lead_id}"
//! rule = { kind = "fact", fact = "has_audit" }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::guards::{Guard, GuardRegistry, GuardRule, HAS_AUDIT};
use crate::pipeline::records::ReadRetry;
use crate::pipeline::stages::StageGraph;

pub const CONFIG_FILE: &str = "leadflow.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Total attempts for a lead read, including the first.
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    #[serde(default = "default_read_retry_delay_ms")]
    pub read_retry_delay_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".leadflow/leadflow.db")
}

fn default_read_attempts() -> u32 {
    3
}

fn default_read_retry_delay_ms() -> u64 {
    250
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            read_attempts: default_read_attempts(),
            read_retry_delay_ms: default_read_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS and bind on all interfaces.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    3150
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    pub stage: String,
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    pub rule: GuardRule,
}

/// The complete leadflow.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadflowToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guards: Vec<GuardConfig>,
}

impl LeadflowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse leadflow.toml")
    }

    /// Load `leadflow.toml` from `dir`, or defaults when it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize leadflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Defaults with the built-in pipeline written out explicitly, used as
    /// the starting file for `leadflow init`.
    pub fn with_default_pipeline() -> Self {
        let stages = StageGraph::default_pipeline()
            .stages()
            .iter()
            .map(|s| StageConfig {
                id: s.id.clone(),
                name: s.name.clone(),
            })
            .collect();
        let guards = vec![
            GuardConfig {
                stage: "audit".into(),
                name: "contact-channel".into(),
                message: "Add a phone number or email before starting the audit".into(),
                remediation: None,
                rule: GuardRule::ContactChannel,
            },
            GuardConfig {
                stage: "proposal".into(),
                name: "audit-completed".into(),
                message: "Complete an audit before sending a proposal".into(),
                remediation: Some("/audits/new?lead={lead_id}".into()),
                rule: GuardRule::Fact {
                    fact: HAS_AUDIT.into(),
                },
            },
            GuardConfig {
                stage: "won".into(),
                name: "deal-value".into(),
                message: "Set a deal value or link a proposal before marking as won".into(),
                remediation: None,
                rule: GuardRule::ValueOrProposal,
            },
        ];
        Self {
            stages,
            guards,
            ..Default::default()
        }
    }

    fn uses_builtin_pipeline(&self) -> bool {
        self.stages.is_empty() && self.guards.is_empty()
    }

    pub fn stage_graph(&self) -> Result<StageGraph> {
        if self.stages.is_empty() {
            return Ok(StageGraph::default_pipeline());
        }
        StageGraph::new(self.stages.iter().map(|s| (s.id.clone(), s.name.clone())))
            .context("Invalid [[stages]] configuration")
    }

    pub fn guard_registry(&self) -> GuardRegistry {
        if self.uses_builtin_pipeline() {
            return GuardRegistry::default_rules();
        }
        let mut registry = GuardRegistry::new();
        for g in &self.guards {
            let mut guard = Guard::from_rule(g.name.clone(), g.rule.clone(), g.message.clone());
            if let Some(ref template) = g.remediation {
                guard = guard.with_remediation(template.clone());
            }
            registry.register(g.stage.clone(), guard);
        }
        registry
    }

    pub fn read_retry(&self) -> ReadRetry {
        ReadRetry {
            attempts: self.store.read_attempts.max(1),
            delay: Duration::from_millis(self.store.read_retry_delay_ms),
        }
    }

    /// Database path, with `LEADFLOW_DB` taking precedence.
    pub fn db_path(&self) -> PathBuf {
        std::env::var("LEADFLOW_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.store.path.clone())
    }

    /// Server port, with `LEADFLOW_PORT` taking precedence when it parses.
    pub fn port(&self) -> u16 {
        std::env::var("LEADFLOW_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.server.port)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self, known_facts: &[&str]) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.store.read_attempts == 0 {
            warnings.push("store.read_attempts is 0; reads will still be attempted once".to_string());
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                warnings.push(format!("Duplicate stage id '{}'", stage.id));
            }
        }

        let graph = match self.stage_graph() {
            Ok(graph) => Some(graph),
            Err(e) => {
                warnings.push(format!("{:#}", e));
                None
            }
        };

        for guard in &self.guards {
            if let Some(ref graph) = graph
                && !graph.contains(&guard.stage)
            {
                warnings.push(format!(
                    "Guard '{}' targets unknown stage '{}'",
                    guard.name, guard.stage
                ));
            }
            for fact in guard.rule.facts() {
                if !known_facts.contains(&fact.as_str()) {
                    warnings.push(format!(
                        "Guard '{}' reads fact '{}' which has no resolver; it will always fail",
                        guard.name, fact
                    ));
                }
            }
        }

        warnings
    }
}
