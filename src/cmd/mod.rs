//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                                        |
//! |----------|---------------------------------------------------------|
//! | `init`   | `Init`                                                  |
//! | `serve`  | `Serve`                                                 |
//! | `leads`  | `Stages`, `Board`, `Show`, `Move`, `Note`, `Import`, `Audit` |
//! | `config` | `Config`                                                |

pub mod config;
pub mod init;
pub mod leads;
pub mod serve;

pub use config::cmd_config;
pub use init::cmd_init;
pub use leads::{cmd_audit, cmd_board, cmd_import, cmd_move, cmd_note, cmd_show, cmd_stages};
pub use serve::cmd_serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use leadflow::config::{CONFIG_FILE, LeadflowToml};
use leadflow::pipeline::Pipeline;
use leadflow::store::SqliteStore;

/// Project directory plus the configuration loaded for it.
pub struct Workspace {
    pub project_dir: PathBuf,
    pub config_path: PathBuf,
    pub config: LeadflowToml,
}

impl Workspace {
    pub fn load(project_dir: &Path, explicit_config: Option<&Path>) -> Result<Self> {
        let config_path = match explicit_config {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => project_dir.join(CONFIG_FILE),
        };
        let config = if config_path.exists() {
            LeadflowToml::load(&config_path)?
        } else {
            LeadflowToml::default()
        };
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config_path,
            config,
        })
    }

    /// Database path with `LEADFLOW_DB` applied, relative to the project dir.
    pub fn db_path(&self) -> PathBuf {
        let path = self.config.db_path();
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        let path = self.db_path();
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open lead database at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn pipeline(&self, store: Arc<SqliteStore>) -> Result<Pipeline> {
        Pipeline::from_config(&self.config, store.clone(), store)
    }
}
