//! Context hydration: resolve externally sourced facts before validation.
//!
//! A lookup failure resolves the fact to `false`. A missing audit record
//! should block a move, not crash the request.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use leadflow_common::{AuditLookup, Lead, StoreError};
use serde::Serialize;

use super::guards::HAS_AUDIT;

/// Boolean facts visible to guards. Absent facts read as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GuardContext {
    facts: BTreeMap<String, bool>,
}

impl GuardContext {
    pub fn with_fact(mut self, fact: impl Into<String>, value: bool) -> Self {
        self.facts.insert(fact.into(), value);
        self
    }

    pub fn set(&mut self, fact: impl Into<String>, value: bool) {
        self.facts.insert(fact.into(), value);
    }

    pub fn fact(&self, fact: &str) -> bool {
        self.facts.get(fact).copied().unwrap_or(false)
    }

    pub fn facts(&self) -> &BTreeMap<String, bool> {
        &self.facts
    }
}

/// Resolves one named fact for a lead via some collaborator.
#[async_trait]
pub trait FactResolver: Send + Sync {
    async fn resolve(&self, lead: &Lead) -> Result<bool, StoreError>;
}

/// `has_audit`: true when the audit collaborator has a record for the lead.
pub struct AuditFactResolver {
    audits: Arc<dyn AuditLookup>,
}

impl AuditFactResolver {
    pub fn new(audits: Arc<dyn AuditLookup>) -> Self {
        Self { audits }
    }
}

#[async_trait]
impl FactResolver for AuditFactResolver {
    async fn resolve(&self, lead: &Lead) -> Result<bool, StoreError> {
        Ok(self.audits.audit_for_lead(&lead.id).await?.is_some())
    }
}

#[derive(Clone, Default)]
pub struct ContextHydrator {
    resolvers: HashMap<String, Arc<dyn FactResolver>>,
}

impl ContextHydrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrator wired with the built-in `has_audit` resolver.
    pub fn with_audits(audits: Arc<dyn AuditLookup>) -> Self {
        let mut hydrator = Self::new();
        hydrator.register(HAS_AUDIT, Arc::new(AuditFactResolver::new(audits)));
        hydrator
    }

    pub fn register(&mut self, fact: impl Into<String>, resolver: Arc<dyn FactResolver>) -> &mut Self {
        self.resolvers.insert(fact.into(), resolver);
        self
    }

    pub fn knows(&self, fact: &str) -> bool {
        self.resolvers.contains_key(fact)
    }

    /// Resolve every fact in `facts` for `lead`. Never fails.
    pub async fn hydrate(&self, lead: &Lead, facts: &BTreeSet<String>) -> GuardContext {
        let mut ctx = GuardContext::default();
        for fact in facts {
            let value = match self.resolvers.get(fact) {
                Some(resolver) => match resolver.resolve(lead).await {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(
                            lead_id = %lead.id,
                            fact = %fact,
                            error = %e,
                            "Fact lookup failed; treating as false"
                        );
                        false
                    }
                },
                None => {
                    tracing::warn!(fact = %fact, "No resolver registered for fact; treating as false");
                    false
                }
            };
            ctx.set(fact.clone(), value);
        }
        ctx
    }
}

impl std::fmt::Debug for ContextHydrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut facts: Vec<&String> = self.resolvers.keys().collect();
        facts.sort();
        f.debug_struct("ContextHydrator").field("facts", &facts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn facts(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    struct Failing;

    #[async_trait]
    impl FactResolver for Failing {
        async fn resolve(&self, _lead: &Lead) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("audit service down".into()))
        }
    }

    #[tokio::test]
    async fn resolves_has_audit_from_collaborator() {
        let store = Arc::new(MemoryStore::new());
        let hydrator = ContextHydrator::with_audits(store.clone());
        let lead = Lead::new("lead-1", "Acme", "audit", "t");

        let ctx = hydrator.hydrate(&lead, &facts(&[HAS_AUDIT])).await;
        assert!(!ctx.fact(HAS_AUDIT));
        assert_eq!(ctx.facts().get(HAS_AUDIT), Some(&false));

        store.record_audit("lead-1", "Site audit done");
        let ctx = hydrator.hydrate(&lead, &facts(&[HAS_AUDIT])).await;
        assert!(ctx.fact(HAS_AUDIT));
    }

    #[tokio::test]
    async fn lookup_failure_resolves_false() {
        let mut hydrator = ContextHydrator::new();
        hydrator.register("flaky", Arc::new(Failing));
        let lead = Lead::new("lead-1", "Acme", "audit", "t");

        let ctx = hydrator.hydrate(&lead, &facts(&["flaky"])).await;
        assert!(!ctx.fact("flaky"));
    }

    #[tokio::test]
    async fn unknown_fact_resolves_false() {
        let hydrator = ContextHydrator::new();
        let lead = Lead::new("lead-1", "Acme", "audit", "t");
        let ctx = hydrator.hydrate(&lead, &facts(&["mystery"])).await;
        assert!(!ctx.fact("mystery"));
        assert!(!hydrator.knows("mystery"));
    }

    #[tokio::test]
    async fn no_facts_means_empty_context() {
        let hydrator = ContextHydrator::new();
        let lead = Lead::new("lead-1", "Acme", "audit", "t");
        let ctx = hydrator.hydrate(&lead, &BTreeSet::new()).await;
        assert!(ctx.facts().is_empty());
    }
}
