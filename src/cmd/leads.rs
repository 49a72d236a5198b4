//! Lead and board commands: `leadflow stages|board|show|move|note|import|audit`.

use std::path::Path;

use anyhow::{Context, Result};
use leadflow::WorkflowError;
use leadflow::pipeline::{MoveOutcome, NewActivity, NewLead, timeline};
use leadflow_common::{ActivityKind, NextAction, format_amount};

use super::Workspace;

/// Print guard violations to stderr and hand the error back for exit status.
fn report(err: WorkflowError) -> anyhow::Error {
    for v in err.violations() {
        eprintln!("  {} {}", console::style(&v.guard).yellow(), v.message);
        if let Some(ref link) = v.remediation {
            eprintln!("    fix: {}", link);
        }
    }
    anyhow::Error::new(err)
}

pub fn cmd_stages(workspace: &Workspace) -> Result<()> {
    let graph = workspace.config.stage_graph()?;
    let registry = workspace.config.guard_registry();

    for stage in graph.stages() {
        println!(
            "{}. {} ({})",
            stage.ordinal + 1,
            console::style(&stage.name).bold(),
            stage.id
        );
        for guard in registry.guards_for(&stage.id) {
            println!("     requires {}: {}", guard.name(), guard.message());
        }
    }
    Ok(())
}

pub async fn cmd_board(workspace: &Workspace) -> Result<()> {
    let pipeline = workspace.pipeline(workspace.open_store()?)?;
    let board = pipeline.board().await.map_err(report)?;

    for column in &board.columns {
        println!(
            "{} ({}, {})",
            console::style(&column.stage.name).bold().cyan(),
            column.cards.len(),
            format_amount(board.total_value(&column.stage.id))
        );
        for card in &column.cards {
            let next = card
                .next_action
                .as_ref()
                .and_then(NextAction::pending_text)
                .map(|t| format!("  next: {}", t))
                .unwrap_or_default();
            println!(
                "  {}  {}  {}{}",
                card.lead_id,
                card.name,
                format_amount(card.value),
                next
            );
        }
    }
    if !board.unassigned.is_empty() {
        println!("{}", console::style("Unassigned").bold().red());
        for card in &board.unassigned {
            println!("  {}  {}", card.lead_id, card.name);
        }
    }
    Ok(())
}

pub async fn cmd_show(workspace: &Workspace, lead_id: &str) -> Result<()> {
    let pipeline = workspace.pipeline(workspace.open_store()?)?;
    let lead = pipeline.require_lead(lead_id).await.map_err(report)?;

    println!("{} ({})", console::style(&lead.name).bold(), lead.id);
    println!("  stage:   {}", pipeline.graph().display_name(&lead.stage));
    if let Some(ref company) = lead.company {
        println!("  company: {}", company);
    }
    if let Some(ref phone) = lead.phone {
        println!("  phone:   {}", phone);
    }
    if let Some(ref email) = lead.email {
        println!("  email:   {}", email);
    }
    println!("  value:   {}", format_amount(lead.value));
    if let Some(text) = lead.next_action.as_ref().and_then(NextAction::pending_text) {
        println!("  next:    {}", text);
    }
    println!();
    for entry in timeline(&lead.activities) {
        println!(
            "  {}  {:<7} {}  ({})",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.kind.as_str(),
            entry.body,
            entry.actor
        );
    }
    Ok(())
}

pub async fn cmd_move(workspace: &Workspace, lead_id: &str, stage: &str, actor: &str) -> Result<()> {
    let pipeline = workspace.pipeline(workspace.open_store()?)?;
    let outcome = pipeline
        .request_move(lead_id, stage, actor)
        .await
        .map_err(report)?;

    match outcome {
        MoveOutcome::Moved { from, to, .. } => println!(
            "Moved {} from {} to {}",
            lead_id,
            pipeline.graph().display_name(&from),
            pipeline.graph().display_name(&to)
        ),
        MoveOutcome::Unchanged { stage } => println!(
            "{} is already in {}",
            lead_id,
            pipeline.graph().display_name(&stage)
        ),
    }
    Ok(())
}

pub async fn cmd_note(
    workspace: &Workspace,
    lead_id: &str,
    text: &str,
    kind: &str,
    actor: &str,
) -> Result<()> {
    let kind: ActivityKind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let pipeline = workspace.pipeline(workspace.open_store()?)?;
    let entry = pipeline
        .add_activity(
            lead_id,
            NewActivity {
                kind,
                body: text.to_string(),
            },
            actor,
        )
        .await
        .map_err(report)?;
    println!("Logged {} on {} ({})", entry.kind, lead_id, entry.id);
    Ok(())
}

pub async fn cmd_import(workspace: &Workspace, file: &Path, actor: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let leads: Vec<NewLead> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse leads from {}", file.display()))?;

    let pipeline = workspace.pipeline(workspace.open_store()?)?;
    let mut imported = 0;
    let mut skipped = 0;
    for new in leads {
        match pipeline.create_lead(new, actor).await {
            Ok(lead) => {
                imported += 1;
                println!("  + {} {}", lead.id, lead.name);
            }
            Err(WorkflowError::DuplicateLead { lead_id }) => {
                skipped += 1;
                tracing::warn!(lead_id = %lead_id, "Lead already exists; skipping");
            }
            Err(e) => return Err(report(e)),
        }
    }
    println!("Imported {} leads ({} skipped)", imported, skipped);
    Ok(())
}

pub async fn cmd_audit(workspace: &Workspace, lead_id: &str, summary: &str) -> Result<()> {
    let store = workspace.open_store()?;
    let record = store.record_audit(lead_id, summary).await?;
    println!("Recorded audit {} for {}", record.id, lead_id);
    Ok(())
}
