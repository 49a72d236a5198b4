//! Board projection for drag-and-drop clients.
//!
//! Column membership is a pure function of a confirmed store snapshot. A
//! client never moves a card locally: it issues one `request_move`, then
//! re-renders from the next snapshot, so a rejected move is undone simply by
//! never having been shown.

use chrono::{DateTime, Utc};
use leadflow_common::{Lead, NextAction};
use serde::Serialize;

use super::stages::{Stage, StageGraph};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub lead_id: String,
    pub name: String,
    pub company: Option<String>,
    pub value: i64,
    pub stage_updated_at: DateTime<Utc>,
    pub next_action: Option<NextAction>,
    /// Stage ids this card may be dropped on.
    pub allowed_targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub stage: Stage,
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardView {
    pub columns: Vec<Column>,
    /// Leads whose stored stage is not in the graph.
    pub unassigned: Vec<Card>,
}

impl BoardView {
    pub fn from_snapshot(graph: &StageGraph, leads: Vec<Lead>) -> Self {
        let mut columns: Vec<Column> = graph
            .stages()
            .iter()
            .map(|stage| Column {
                stage: stage.clone(),
                cards: Vec::new(),
            })
            .collect();
        let mut unassigned = Vec::new();

        for lead in leads {
            let card = Card {
                allowed_targets: graph
                    .allowed_targets(&lead.stage)
                    .into_iter()
                    .map(|s| s.id.clone())
                    .collect(),
                lead_id: lead.id,
                name: lead.name,
                company: lead.company,
                value: lead.value,
                stage_updated_at: lead.stage_updated_at,
                next_action: lead.next_action,
            };
            match graph.ordinal(&lead.stage) {
                Some(i) => columns[i].cards.push(card),
                None => unassigned.push(card),
            }
        }

        for column in &mut columns {
            column
                .cards
                .sort_by(|a, b| b.stage_updated_at.cmp(&a.stage_updated_at).then_with(|| a.lead_id.cmp(&b.lead_id)));
        }

        Self {
            columns,
            unassigned,
        }
    }

    pub fn column_of(&self, lead_id: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.cards.iter().any(|card| card.lead_id == lead_id))
            .map(|c| c.stage.id.as_str())
    }

    pub fn total_value(&self, stage_id: &str) -> i64 {
        self.columns
            .iter()
            .filter(|c| c.stage.id == stage_id)
            .flat_map(|c| c.cards.iter())
            .map(|card| card.value)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn groups_leads_by_stage_in_pipeline_order() {
        let graph = StageGraph::default_pipeline();
        let leads = vec![
            Lead::new("1", "One", "audit", "t"),
            Lead::new("2", "Two", "new", "t"),
            Lead::new("3", "Three", "audit", "t").with_value(500),
        ];
        let board = BoardView::from_snapshot(&graph, leads);

        assert_eq!(board.columns.len(), 5);
        assert_eq!(board.columns[0].stage.id, "new");
        assert_eq!(board.columns[2].cards.len(), 2);
        assert_eq!(board.column_of("2"), Some("new"));
        assert_eq!(board.column_of("3"), Some("audit"));
        assert_eq!(board.total_value("audit"), 500);
    }

    #[test]
    fn cards_expose_allowed_drop_targets() {
        let graph = StageGraph::default_pipeline();
        let board = BoardView::from_snapshot(&graph, vec![Lead::new("1", "One", "new", "t")]);
        assert_eq!(board.columns[0].cards[0].allowed_targets, vec!["new", "contacted"]);
    }

    #[test]
    fn unknown_stage_goes_to_unassigned() {
        let graph = StageGraph::default_pipeline();
        let board = BoardView::from_snapshot(&graph, vec![Lead::new("1", "One", "archived", "t")]);
        assert_eq!(board.unassigned.len(), 1);
        assert!(board.unassigned[0].allowed_targets.is_empty());
        assert_eq!(board.column_of("1"), None);
    }

    #[test]
    fn most_recently_moved_card_first() {
        let graph = StageGraph::default_pipeline();
        let mut older = Lead::new("old", "Old", "new", "t");
        older.stage_updated_at = older.stage_updated_at - Duration::hours(1);
        let newer = Lead::new("fresh", "Fresh", "new", "t");
        let board = BoardView::from_snapshot(&graph, vec![older, newer]);
        let ids: Vec<&str> = board.columns[0].cards.iter().map(|c| c.lead_id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "old"]);
    }
}
