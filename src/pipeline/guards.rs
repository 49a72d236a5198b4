//! Declarative entry guards.
//!
//! Each target stage maps to an ordered list of named predicates over
//! `(lead, context)`. Guards are pure: any fact that needs a lookup is
//! declared up front and resolved into the `GuardContext` by the hydrator.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use leadflow_common::Lead;
use serde::{Deserialize, Serialize};

use super::hydrator::GuardContext;

/// Fact resolved by the audit collaborator: does a completed audit exist.
pub const HAS_AUDIT: &str = "has_audit";

pub type GuardFn = Arc<dyn Fn(&Lead, &GuardContext) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadField {
    Phone,
    Email,
    Address,
    Company,
}

impl LeadField {
    fn value<'a>(&self, lead: &'a Lead) -> Option<&'a str> {
        match self {
            Self::Phone => lead.phone.as_deref(),
            Self::Email => lead.email.as_deref(),
            Self::Address => lead.address.as_deref(),
            Self::Company => lead.company.as_deref(),
        }
    }
}

/// Built-in predicates that can be declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardRule {
    /// Phone or email present.
    ContactChannel,
    /// A hydrated context fact must be true.
    Fact { fact: String },
    /// `value > 0` or a linked proposal.
    ValueOrProposal,
    PositiveValue,
    FieldPresent { field: LeadField },
}

impl GuardRule {
    pub fn evaluate(&self, lead: &Lead, ctx: &GuardContext) -> bool {
        match self {
            GuardRule::ContactChannel => lead.has_contact_channel(),
            GuardRule::Fact { fact } => ctx.fact(fact),
            GuardRule::ValueOrProposal => lead.value > 0 || lead.has_proposal(),
            GuardRule::PositiveValue => lead.value > 0,
            GuardRule::FieldPresent { field } => {
                field.value(lead).is_some_and(|v| !v.trim().is_empty())
            }
        }
    }

    pub fn facts(&self) -> Vec<String> {
        match self {
            GuardRule::Fact { fact } => vec![fact.clone()],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone)]
enum GuardCheck {
    Rule(GuardRule),
    Custom { facts: Vec<String>, check: GuardFn },
}

#[derive(Clone)]
pub struct Guard {
    name: String,
    message: String,
    remediation: Option<String>,
    check: GuardCheck,
}

impl Guard {
    pub fn from_rule(name: impl Into<String>, rule: GuardRule, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            remediation: None,
            check: GuardCheck::Rule(rule),
        }
    }

    /// A guard backed by an arbitrary pure closure. `facts` lists the context
    /// facts the closure reads so they get hydrated first.
    pub fn custom<F>(name: impl Into<String>, message: impl Into<String>, facts: &[&str], check: F) -> Self
    where
        F: Fn(&Lead, &GuardContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            message: message.into(),
            remediation: None,
            check: GuardCheck::Custom {
                facts: facts.iter().map(|f| f.to_string()).collect(),
                check: Arc::new(check),
            },
        }
    }

    /// Attach a remediation link. `{lead_id}` is substituted per lead.
    pub fn with_remediation(mut self, template: impl Into<String>) -> Self {
        self.remediation = Some(template.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn evaluate(&self, lead: &Lead, ctx: &GuardContext) -> bool {
        match &self.check {
            GuardCheck::Rule(rule) => rule.evaluate(lead, ctx),
            GuardCheck::Custom { check, .. } => check(lead, ctx),
        }
    }

    pub fn required_facts(&self) -> Vec<String> {
        match &self.check {
            GuardCheck::Rule(rule) => rule.facts(),
            GuardCheck::Custom { facts, .. } => facts.clone(),
        }
    }

    pub fn remediation_for(&self, lead_id: &str) -> Option<String> {
        self.remediation
            .as_ref()
            .map(|t| t.replace("{lead_id}", lead_id))
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let check = match &self.check {
            GuardCheck::Rule(rule) => format!("{:?}", rule),
            GuardCheck::Custom { facts, .. } => format!("Custom {{ facts: {:?} }}", facts),
        };
        f.debug_struct("Guard")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("remediation", &self.remediation)
            .field("check", &check)
            .finish()
    }
}

/// Stage id → ordered guards for entering that stage.
#[derive(Debug, Clone, Default)]
pub struct GuardRegistry {
    by_stage: HashMap<String, Vec<Guard>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The representative guards of the default pipeline.
    pub fn default_rules() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                "audit",
                Guard::from_rule(
                    "contact-channel",
                    GuardRule::ContactChannel,
                    "Add a phone number or email before starting the audit",
                ),
            )
            .register(
                "proposal",
                Guard::from_rule(
                    "audit-completed",
                    GuardRule::Fact {
                        fact: HAS_AUDIT.to_string(),
                    },
                    "Complete an audit before sending a proposal",
                )
                .with_remediation("/audits/new?lead={lead_id}"),
            )
            .register(
                "won",
                Guard::from_rule(
                    "deal-value",
                    GuardRule::ValueOrProposal,
                    "Set a deal value or link a proposal before marking as won",
                ),
            );
        registry
    }

    pub fn register(&mut self, stage: impl Into<String>, guard: Guard) -> &mut Self {
        self.by_stage.entry(stage.into()).or_default().push(guard);
        self
    }

    pub fn guards_for(&self, stage: &str) -> &[Guard] {
        self.by_stage.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Facts the hydrator must resolve before `stage` can be validated.
    pub fn required_facts(&self, stage: &str) -> BTreeSet<String> {
        self.guards_for(stage)
            .iter()
            .flat_map(Guard::required_facts)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_stage.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
