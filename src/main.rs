use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "leadflow")]
#[command(version, about = "Sales-pipeline workflow engine with guarded stage transitions")]
pub struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to leadflow.toml (defaults to <project-dir>/leadflow.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a leadflow.toml with the default pipeline and create the database
    Init {
        /// Overwrite an existing leadflow.toml
        #[arg(long)]
        force: bool,
    },
    /// Serve the HTTP API for board clients
    Serve {
        /// Port to serve on (defaults to [server] port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Permissive CORS and bind on all interfaces
        #[arg(long)]
        dev: bool,
    },
    /// List pipeline stages and their entry guards
    Stages,
    /// Print the board grouped by stage
    Board,
    /// Show one lead with its activity timeline
    Show { lead: String },
    /// Request a guarded stage transition
    Move {
        lead: String,
        stage: String,

        #[arg(long, env = "LEADFLOW_ACTOR", default_value = "cli")]
        actor: String,
    },
    /// Append an activity to a lead's history
    Note {
        lead: String,
        text: String,

        /// note, call, meeting, email, deal or status
        #[arg(long, default_value = "note")]
        kind: String,

        #[arg(long, env = "LEADFLOW_ACTOR", default_value = "cli")]
        actor: String,
    },
    /// Import captured leads from a JSON array; each lands on the first stage
    Import {
        file: PathBuf,

        #[arg(long, env = "LEADFLOW_ACTOR", default_value = "import")]
        actor: String,
    },
    /// Record a completed audit for a lead
    Audit {
        lead: String,

        #[arg(long, default_value = "Audit completed")]
        summary: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default leadflow.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let workspace = cmd::Workspace::load(&project_dir, cli.config.as_deref())?;
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        workspace.config.logging.level.clone()
    };
    leadflow::logging::init(&level, cli.log_json || workspace.config.logging.json);

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&workspace, *force)?,
        Commands::Serve { port, dev } => cmd::cmd_serve(&workspace, *port, *dev).await?,
        Commands::Stages => cmd::cmd_stages(&workspace)?,
        Commands::Board => cmd::cmd_board(&workspace).await?,
        Commands::Show { lead } => cmd::cmd_show(&workspace, lead).await?,
        Commands::Move { lead, stage, actor } => {
            cmd::cmd_move(&workspace, lead, stage, actor).await?
        }
        Commands::Note {
            lead,
            text,
            kind,
            actor,
        } => cmd::cmd_note(&workspace, lead, text, kind, actor).await?,
        Commands::Import { file, actor } => cmd::cmd_import(&workspace, file, actor).await?,
        Commands::Audit { lead, summary } => cmd::cmd_audit(&workspace, lead, summary).await?,
        Commands::Config { command } => cmd::cmd_config(&workspace, command.clone())?,
    }

    Ok(())
}
