//! Complexity/tier → fallback chain policy table.
//!
//! | complexity | paying caller                  | free caller         |
//! |------------|--------------------------------|---------------------|
//! | Simple     | cheapest, economy, standard    | same                |
//! | Medium     | standard, premium, economy     | standard, economy   |
//! | Complex    | premium, standard, economy     | standard, economy   |
//!
//! Within a model tier, providers are ordered by configured priority (lower
//! first), then by id. Nothing here is random, so the same request always
//! produces the same chain.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::llm::classifier::ComplexityTier;
use crate::llm::provider::{LlmProvider, ModelTier};
use crate::llm::request::SubscriptionTier;

/// A configured provider and where it sits in the policy.
#[derive(Clone)]
pub struct ProviderSlot {
    pub provider: Arc<dyn LlmProvider>,
    pub tier: ModelTier,
    /// Lower is preferred.
    pub priority: u32,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn LlmProvider>, tier: ModelTier, priority: u32) -> Self {
        Self {
            provider,
            tier,
            priority,
        }
    }

    pub fn id(&self) -> &str {
        self.provider.id()
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("id", &self.provider.id())
            .field("model", &self.provider.model_name())
            .field("tier", &self.tier)
            .field("priority", &self.priority)
            .finish()
    }
}

/// The set of configured providers and the rules for ordering them.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// Sorted by (priority, id).
    slots: Vec<ProviderSlot>,
}

impl RoutingPolicy {
    pub fn new(mut slots: Vec<ProviderSlot>) -> Result<Self, ConfigError> {
        if slots.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "providers".to_string(),
                hint: "Configure at least one of ANTHROPIC_API_KEY, OPENAI_API_KEY or GOOGLE_API_KEY"
                    .to_string(),
            });
        }
        slots.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id().cmp(b.id())));
        let mut ids: Vec<&str> = slots.iter().map(|s| s.id()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::InvalidValue {
                key: "providers".to_string(),
                message: format!("duplicate provider id '{}'", dup[0]),
            });
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[ProviderSlot] {
        &self.slots
    }

    pub fn find(&self, id: &str) -> Option<&ProviderSlot> {
        self.slots.iter().find(|s| s.id() == id)
    }

    /// Lowest blended per-token price; ties go to priority order.
    pub fn cheapest(&self) -> &ProviderSlot {
        let mut best = &self.slots[0];
        for slot in &self.slots[1..] {
            if slot.provider.blended_cost() < best.provider.blended_cost() {
                best = slot;
            }
        }
        best
    }

    /// Fallback chain for a classified request.
    pub fn chain(&self, complexity: ComplexityTier, caller: SubscriptionTier) -> Vec<ProviderSlot> {
        use ModelTier::{Economy, Premium, Standard};

        let order: &[ModelTier] = match (complexity, caller.is_paying()) {
            (ComplexityTier::Simple, _) => {
                let mut chain = vec![self.cheapest().clone()];
                self.extend_with_tiers(&mut chain, &[Economy, Standard]);
                return chain;
            }
            (ComplexityTier::Medium, true) => &[Standard, Premium, Economy],
            (ComplexityTier::Complex, true) => &[Premium, Standard, Economy],
            (_, false) => &[Standard, Economy],
        };

        let mut chain = Vec::new();
        self.extend_with_tiers(&mut chain, order);
        chain
    }

    /// Chain used when smart routing is switched off: the selected provider
    /// first, then everything else by priority.
    pub fn fixed_chain(&self, selected: Option<&str>) -> Vec<ProviderSlot> {
        let mut chain = Vec::with_capacity(self.slots.len());
        if let Some(slot) = selected.and_then(|id| self.find(id)) {
            chain.push(slot.clone());
        }
        for slot in &self.slots {
            if !chain.iter().any(|c| c.id() == slot.id()) {
                chain.push(slot.clone());
            }
        }
        chain
    }

    fn extend_with_tiers(&self, chain: &mut Vec<ProviderSlot>, tiers: &[ModelTier]) {
        for tier in tiers {
            for slot in self.slots.iter().filter(|s| s.tier == *tier) {
                if !chain.iter().any(|c| c.id() == slot.id()) {
                    chain.push(slot.clone());
                }
            }
        }
    }
}
