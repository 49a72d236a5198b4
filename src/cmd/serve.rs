//! HTTP server command: `leadflow serve`.

use anyhow::Result;
use leadflow::server::{ServerConfig, start_server};

use super::Workspace;

pub async fn cmd_serve(workspace: &Workspace, port: Option<u16>, dev: bool) -> Result<()> {
    let mut config = ServerConfig::from_toml(&workspace.config);
    config.db_path = workspace.db_path();
    if let Some(port) = port {
        config.port = port;
    }
    config.dev_mode |= dev;

    start_server(config, &workspace.config).await
}
