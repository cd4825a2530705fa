use crate::resources::resource::WeakResourceRef;
use crate::resources::tier::Tier;
use log::warn;
use std::sync::Weak;

/// The hooks a concrete resource kind (texture, material, mesh, ...) implements.
///
/// Hooks are always invoked with the owning resource's lock held, one tier step at a time, so a
/// kind never sees two hooks of the same resource run concurrently. They must not call `require`
/// or `release` on their own resource (that would self-deadlock), but may do so on others.
///
/// A hook that fails has to leave no partial state behind: the core only rolls back dependencies,
/// it knows nothing about a half-filled decode buffer. A panicking load hook counts as a failed one.
pub trait ResourceKind: Send + Sync + 'static {
    /// Whether this kind can ever reach `tier`.
    fn supports_state(&self, tier: Tier) -> bool {
        let _ = tier;
        true
    }

    /// Decode/parse work. May declare further dependencies, see [`Dependencies`].
    fn load_to_ram(&self, path: &str, dependencies: &mut Dependencies<'_>) -> anyhow::Result<()>;

    fn unload_from_ram(&self, path: &str);

    fn load_to_gpu(&self, path: &str) -> anyhow::Result<()> {
        let _ = path;
        Ok(())
    }

    fn unload_from_gpu(&self, path: &str) {
        let _ = path;
    }

    /// Whether transitions into/out of `tier` have to run on the owning context (the thread that
    /// holds the device) instead of the background loading thread.
    fn requires_owning_context(&self, tier: Tier) -> bool {
        tier == Tier::Gpu
    }
}

/// A static declaration: reaching the owning tier requires `dependency` to be at `required_tier`.
#[derive(Debug, Clone)]
pub struct DependencyRequirement {
    pub dependency: WeakResourceRef,
    pub required_tier: Tier,
}

/// Declared dependency requirements, one list per owning tier.
#[derive(Debug, Default)]
pub(crate) struct DeclaredDependencies([Vec<DependencyRequirement>; 3]);

impl DeclaredDependencies {
    pub(crate) fn for_tier(&self, tier: Tier) -> &[DependencyRequirement] {
        &self.0[tier.index()]
    }

    /// Returns false if an identical declaration already exists.
    pub(crate) fn insert(&mut self, owning_tier: Tier, dependency: WeakResourceRef, required_tier: Tier) -> bool {
        let list = &mut self.0[owning_tier.index()];
        let duplicate = list
            .iter()
            .any(|req| req.required_tier == required_tier && Weak::ptr_eq(&req.dependency, &dependency));
        if duplicate {
            return false;
        }

        list.push(DependencyRequirement {
            dependency,
            required_tier,
        });
        true
    }
}

/// The view a [`ResourceKind`] gets during `load_to_ram` to declare dependencies.
///
/// Declarations for higher tiers are acquired when those tiers are entered. Declarations for the
/// tier being entered itself are acquired right after the hook returns, and if that fails the hook
/// is undone again. The declarations outlive an unload, so a reload finds them already in place.
pub struct Dependencies<'a> {
    declared: &'a mut DeclaredDependencies,
    owner_path: &'a str,
    owner: usize,
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(declared: &'a mut DeclaredDependencies, owner_path: &'a str, owner: usize) -> Self {
        Self {
            declared,
            owner_path,
            owner,
        }
    }

    /// Declares that reaching `owning_tier` on the resource being loaded requires `dependency` to be
    /// at least at `required_tier`. Returns whether the declaration was recorded.
    pub fn register_dependency(&mut self, owning_tier: Tier, dependency: WeakResourceRef, required_tier: Tier) -> bool {
        register(self.declared, self.owner_path, self.owner, owning_tier, dependency, required_tier)
    }
}

/// Identity of a resource for self-dependency checks, its address.
pub(crate) fn address_of(dependency: &WeakResourceRef) -> usize {
    dependency.as_ptr().cast::<()>() as usize
}

pub(crate) fn register(
    declared: &mut DeclaredDependencies,
    owner_path: &str,
    owner: usize,
    owning_tier: Tier,
    dependency: WeakResourceRef,
    required_tier: Tier,
) -> bool {
    if owning_tier == Tier::Drive {
        warn!(target: "resources", "{}: Drive is never acquired, dependencies for it are ignored", owner_path);
        return false;
    }

    if address_of(&dependency) == owner {
        warn!(target: "resources", "{}: a resource cannot depend on itself", owner_path);
        return false;
    }

    if !declared.insert(owning_tier, dependency, required_tier) {
        log::trace!(
            target: "resources",
            "{}: dependency for {} (at {}) already declared",
            owner_path, owning_tier, required_tier
        );
        return false;
    }

    true
}
