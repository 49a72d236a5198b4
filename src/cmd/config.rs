//! Configuration view and validation commands: `leadflow config`.

use anyhow::Result;
use leadflow::config::LeadflowToml;
use leadflow::pipeline::HAS_AUDIT;

use super::Workspace;
use super::super::ConfigCommands;

pub fn cmd_config(workspace: &Workspace, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &workspace.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("leadflow configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No leadflow.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            let toml = &workspace.config;
            println!("[store]");
            println!("  path = \"{}\"", toml.store.path.display());
            println!("  read_attempts = {}", toml.store.read_attempts);
            println!("  read_retry_delay_ms = {}", toml.store.read_retry_delay_ms);
            println!();
            println!("[server]");
            println!("  port = {}", toml.server.port);
            println!("  dev_mode = {}", toml.server.dev_mode);
            println!();
            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  json = {}", toml.logging.json);
            println!();

            let graph = toml.stage_graph()?;
            let registry = toml.guard_registry();
            println!("Pipeline ({} stages, {} guards):", graph.len(), registry.len());
            for stage in graph.stages() {
                println!("  {} ({})", stage.id, stage.name);
            }
            println!();

            println!("Effective values (with env overrides):");
            println!("  db = \"{}\"", workspace.db_path().display());
            println!("  port = {}", toml.port());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No leadflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = workspace.config.validate(&[HAS_AUDIT]);
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("leadflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            LeadflowToml::with_default_pipeline().save(config_path)?;

            println!("Created leadflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [store] path, read_attempts, read_retry_delay_ms");
            println!("  - [[stages]] to reshape the pipeline");
            println!("  - [[guards]] to change what each stage requires");
            println!();
        }
    }

    Ok(())
}
