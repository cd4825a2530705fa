use crate::resources::tier::Tier;
use thiserror::Error;

/// Why a promotion walk stopped before reaching its target tier.
///
/// None of these are fatal: the resource stays at the last tier it fully reached and any dependency
/// acquired for the failed tier has already been released again.
#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("{path} does not support the {tier} tier")]
    Unsupported { path: String, tier: Tier },

    #[error("{path}: a dependency declared for the {owning_tier} tier has been dropped")]
    ExpiredDependency { path: String, owning_tier: Tier },

    #[error("{path}: dependency {dependency} could not reach {required_tier} (required for {owning_tier})")]
    DependencyFailed {
        path: String,
        dependency: String,
        owning_tier: Tier,
        required_tier: Tier,
    },

    #[error("{path}: loading into {tier} failed: {source:#}")]
    HookFailed {
        path: String,
        tier: Tier,
        #[source]
        source: anyhow::Error,
    },
}

impl PromotionError {
    /// The tier the walk was trying to enter when it failed.
    pub fn tier(&self) -> Tier {
        match self {
            PromotionError::Unsupported { tier, .. } | PromotionError::HookFailed { tier, .. } => *tier,
            PromotionError::ExpiredDependency { owning_tier, .. }
            | PromotionError::DependencyFailed { owning_tier, .. } => *owning_tier,
        }
    }
}
