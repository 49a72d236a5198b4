//! Project initialization: `leadflow init`.

use anyhow::Result;
use leadflow::config::LeadflowToml;

use super::Workspace;

pub fn cmd_init(workspace: &Workspace, force: bool) -> Result<()> {
    if workspace.config_path.exists() && !force {
        println!(
            "leadflow.toml already exists at {}",
            workspace.config_path.display()
        );
    } else {
        LeadflowToml::with_default_pipeline().save(&workspace.config_path)?;
        println!("Created {}", workspace.config_path.display());
    }

    let db_path = workspace.db_path();
    workspace.open_store()?;
    println!("Lead database ready at {}", db_path.display());
    Ok(())
}
