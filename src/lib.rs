//! Tiered resource lifecycle management: tracks whether assets are on drive, in RAM or on the GPU,
//! drives them between those tiers on demand and keeps their dependencies in step.
pub mod io;
pub mod kinds;
pub mod resources;
pub mod settings;

pub use resources::error::PromotionError;
pub use resources::kind::{Dependencies, ResourceKind};
pub use resources::manager::{OperationKind, Outcome, PendingOperation, Phase, ResourceManager};
pub use resources::registry::{ResourceGenerator, ResourceRegistry, ResourceSnapshot};
pub use resources::resource::{ActiveDependencyInfo, Resource, ResourceRef, TieredResource, WeakResourceRef};
pub use resources::tier::{Tier, TierCounts};
