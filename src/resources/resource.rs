use crate::resources::error::PromotionError;
use crate::resources::kind::{self, DeclaredDependencies, Dependencies, ResourceKind};
use crate::resources::manager::{OperationKind, PendingOperation, ResourceManager};
use crate::resources::tier::{Tier, TierCounts};
use anyhow::anyhow;
use itertools::Itertools;
use log::{debug, error, info, trace, warn};
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

pub type ResourceRef = Arc<dyn TieredResource>;
pub type WeakResourceRef = Weak<dyn TieredResource>;

/// The kind-independent face of a [`Resource`], so that resources of different kinds can depend on
/// each other and share one queue.
pub trait TieredResource: Send + Sync {
    fn path(&self) -> &str;

    /// Requests the resource to be at least at `tier`. Returns whether it is.
    fn require(&self, tier: Tier) -> bool;

    /// Drops one request for `tier`, demoting if nothing else holds the current tier.
    fn release(&self, tier: Tier);

    /// Counts a request for `tier` only if the resource is already there. Never runs a hook.
    fn hold(&self, tier: Tier) -> bool;

    fn current_tier(&self) -> Tier;

    fn request_counts(&self) -> TierCounts;

    fn active_dependencies(&self) -> Vec<ActiveDependencyInfo>;

    fn is_in_state(&self, tier: Tier) -> bool {
        self.current_tier() >= tier
    }
}

/// Diagnostic snapshot of an acquired dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDependencyInfo {
    pub owning_tier: Tier,
    pub dependency_path: String,
    pub required_tier: Tier,
}

struct ActiveDependency {
    owning_tier: Tier,
    dependency: ResourceRef,
    required_tier: Tier,
}

/// Everything that has to change atomically lives behind one lock.
#[derive(Default)]
struct ResourceState {
    current_tier: Tier,
    request_counts: TierCounts,
    declared: DeclaredDependencies,
    active: Vec<ActiveDependency>,
}

/// A tracked, externally loadable asset.
///
/// The resource walks the tier ladder one step at a time: each step first acquires the
/// dependencies declared for the tier it enters, then runs the kind's load hook, rolling the
/// dependencies back if the hook fails. Demotion runs the unload hooks top-down and releases the
/// dependencies of each tier it leaves.
///
/// The whole walk runs under the resource's own lock. Since dependencies are required while that
/// lock is held, the dependency graph doubles as a lock order and must be acyclic; this is not
/// checked (beyond direct self-dependencies) and a cycle will deadlock.
pub struct Resource<K: ResourceKind> {
    path: String,
    kind: K,
    state: Mutex<ResourceState>,
    manager: OnceLock<Weak<ResourceManager>>,
}

impl<K: ResourceKind> Resource<K> {
    pub fn new(path: impl Into<String>, kind: K) -> Self {
        Self {
            path: path.into(),
            kind,
            state: Mutex::new(ResourceState::default()),
            manager: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// The non-owning handle used when declaring this resource as somebody's dependency.
    pub fn as_dependency(self: &Arc<Self>) -> WeakResourceRef {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    /// Routes future [`Resource::load`]/[`Resource::unload`] calls through `manager`.
    pub fn set_manager(&self, manager: &Arc<ResourceManager>) {
        if self.manager.set(Arc::downgrade(manager)).is_err() {
            warn!(target: "resources", "{}: already attached to a manager, keeping the first one", self.path);
        }
    }

    pub fn has_manager(&self) -> bool {
        self.manager.get().is_some()
    }

    /// Declares a dependency up front, typically right after construction.
    pub fn register_dependency(&self, owning_tier: Tier, dependency: WeakResourceRef, required_tier: Tier) -> bool {
        let mut state = self.lock_state();
        if owning_tier <= state.current_tier && owning_tier != Tier::Drive {
            warn!(
                target: "resources",
                "{}: declaring a dependency for {} while already at {}, it takes effect after the next demotion",
                self.path, owning_tier, state.current_tier
            );
        }
        kind::register(
            &mut state.declared,
            &self.path,
            self.address(),
            owning_tier,
            dependency,
            required_tier,
        )
    }

    pub fn require(&self, tier: Tier) -> bool {
        match self.try_require(tier) {
            Ok(()) => true,
            Err(err) => {
                error!(target: "resources", "{}", err);
                false
            }
        }
    }

    /// Like [`Resource::require`], but hands out why the promotion failed.
    ///
    /// A failed request is not counted: the caller must not `release` it.
    pub fn try_require(&self, tier: Tier) -> Result<(), PromotionError> {
        let mut state = self.lock_state();
        state.request_counts[tier] += 1;
        trace!(target: "resources", "{}: require({}) -> {}", self.path, tier, state.request_counts);

        if state.current_tier >= tier {
            return Ok(());
        }

        let result = self.promote(&mut state, tier);
        match &result {
            Ok(()) => info!(target: "resources", "{} reached {}", self.path, tier),
            Err(_) => {
                state.request_counts[tier] -= 1;
                // steps below the failed one may have been taken for this request alone
                let desired = state.request_counts.highest_requested();
                if desired < state.current_tier {
                    self.demote(&mut state, desired);
                }
            }
        }
        result
    }

    pub fn release(&self, tier: Tier) {
        let mut state = self.lock_state();
        if state.request_counts[tier] == 0 {
            warn!(
                target: "resources",
                "{}: release({}) without a matching require, ignoring",
                self.path, tier
            );
            return;
        }

        state.request_counts[tier] -= 1;
        trace!(target: "resources", "{}: release({}) -> {}", self.path, tier, state.request_counts);

        let desired = state.request_counts.highest_requested();
        if desired < state.current_tier {
            self.demote(&mut state, desired);
        }
    }

    pub fn hold(&self, tier: Tier) -> bool {
        let mut state = self.lock_state();
        if state.current_tier < tier {
            return false;
        }
        state.request_counts[tier] += 1;
        trace!(target: "resources", "{}: hold({}) -> {}", self.path, tier, state.request_counts);
        true
    }

    /// Asynchronous [`Resource::require`]: goes through the attached manager's queues, or runs
    /// synchronously on the calling thread if there is no manager.
    ///
    /// A tier that has to be entered on the owning context is split: the steps below it run on the
    /// loading thread first, so the owning context only does its own part.
    pub fn load(self: &Arc<Self>, tier: Tier) {
        self.dispatch(OperationKind::Load, tier);
    }

    /// Asynchronous [`Resource::release`], see [`Resource::load`].
    pub fn unload(self: &Arc<Self>, tier: Tier) {
        self.dispatch(OperationKind::Unload, tier);
    }

    fn dispatch(self: &Arc<Self>, kind: OperationKind, tier: Tier) {
        let manager = match self.manager.get() {
            None => None,
            Some(weak) => {
                let manager = weak.upgrade();
                if manager.is_none() {
                    warn!(
                        target: "resources",
                        "{}: the resource manager is gone, running {:?}({}) synchronously",
                        self.path, kind, tier
                    );
                }
                manager
            }
        };

        let resource: ResourceRef = self.clone();
        let Some(manager) = manager else {
            PendingOperation::new(resource, kind, tier).execute();
            return;
        };

        if !self.kind.requires_owning_context(tier) {
            manager.queue_background(PendingOperation::new(resource, kind, tier));
        } else if self.is_split(tier) {
            // both directions enter through the loading thread, so they keep their order
            manager.queue_background(PendingOperation::staged(resource, kind, tier));
        } else {
            manager.queue_owning(PendingOperation::new(resource, kind, tier));
        }
    }

    fn is_split(&self, tier: Tier) -> bool {
        let below = tier.previous();
        below > Tier::Drive && !self.kind.requires_owning_context(below)
    }

    pub fn current_tier(&self) -> Tier {
        self.lock_state().current_tier
    }

    pub fn is_in_state(&self, tier: Tier) -> bool {
        self.current_tier() >= tier
    }

    pub fn request_counts(&self) -> TierCounts {
        self.lock_state().request_counts
    }

    pub fn active_dependencies(&self) -> Vec<ActiveDependencyInfo> {
        self.lock_state()
            .active
            .iter()
            .map(|active| ActiveDependencyInfo {
                owning_tier: active.owning_tier,
                dependency_path: active.dependency.path().to_string(),
                required_tier: active.required_tier,
            })
            .collect_vec()
    }

    fn lock_state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            error!(
                target: "resources",
                "{}: a hook panicked while the state was locked, continuing with the last recorded state",
                self.path
            );
            self.state.clear_poison();
            poisoned.into_inner()
        })
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    fn promote(&self, state: &mut ResourceState, target: Tier) -> Result<(), PromotionError> {
        while state.current_tier < target {
            let next = state.current_tier.next();
            if !self.kind.supports_state(next) {
                return Err(PromotionError::Unsupported {
                    path: self.path.clone(),
                    tier: next,
                });
            }

            self.acquire_dependencies(state, next, 0)?;

            let entered = match next {
                Tier::Drive => Ok(()),
                Tier::Ram => self.enter_ram(state),
                Tier::Gpu => self.run_hook(Tier::Gpu, || self.kind.load_to_gpu(&self.path)),
            };

            if let Err(err) = entered {
                self.release_dependencies(state, next);
                return Err(err);
            }

            debug!(target: "resources", "{}: {} -> {}", self.path, state.current_tier, next);
            state.current_tier = next;
        }

        Ok(())
    }

    fn enter_ram(&self, state: &mut ResourceState) -> Result<(), PromotionError> {
        let declared_before = state.declared.for_tier(Tier::Ram).len();
        let mut dependencies = Dependencies::new(&mut state.declared, &self.path, self.address());
        self.run_hook(Tier::Ram, || self.kind.load_to_ram(&self.path, &mut dependencies))?;

        // the hook may have declared dependencies for Ram itself
        if let Err(err) = self.acquire_dependencies(state, Tier::Ram, declared_before) {
            self.kind.unload_from_ram(&self.path);
            return Err(err);
        }
        Ok(())
    }

    fn run_hook(&self, tier: Tier, hook: impl FnOnce() -> anyhow::Result<()>) -> Result<(), PromotionError> {
        let result = match std::panic::catch_unwind(AssertUnwindSafe(hook)) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("the load hook panicked: {}", panic_message(payload.as_ref()))),
        };

        result.map_err(|source| PromotionError::HookFailed {
            path: self.path.clone(),
            tier,
            source,
        })
    }

    fn demote(&self, state: &mut ResourceState, target: Tier) {
        while state.current_tier > target {
            let current = state.current_tier;
            match current {
                Tier::Gpu => self.kind.unload_from_gpu(&self.path),
                Tier::Ram => self.kind.unload_from_ram(&self.path),
                Tier::Drive => {}
            }
            self.release_dependencies(state, current);

            debug!(target: "resources", "{}: {} -> {}", self.path, current, current.previous());
            state.current_tier = current.previous();
        }
    }

    /// Acquires the declarations for `owning_tier`, skipping the first `skip` of them.
    fn acquire_dependencies(
        &self,
        state: &mut ResourceState,
        owning_tier: Tier,
        skip: usize,
    ) -> Result<(), PromotionError> {
        if state.declared.for_tier(owning_tier).len() <= skip {
            return Ok(());
        }

        let mut acquired: Vec<ActiveDependency> = Vec::new();
        for requirement in &state.declared.for_tier(owning_tier)[skip..] {
            let Some(dependency) = requirement.dependency.upgrade() else {
                Self::roll_back(&self.path, acquired);
                return Err(PromotionError::ExpiredDependency {
                    path: self.path.clone(),
                    owning_tier,
                });
            };

            if !dependency.require(requirement.required_tier) {
                Self::roll_back(&self.path, acquired);
                return Err(PromotionError::DependencyFailed {
                    path: self.path.clone(),
                    dependency: dependency.path().to_string(),
                    owning_tier,
                    required_tier: requirement.required_tier,
                });
            }

            debug!(
                target: "resources",
                "{}: acquired {} at {} for {}",
                self.path,
                dependency.path(),
                requirement.required_tier,
                owning_tier
            );
            acquired.push(ActiveDependency {
                owning_tier,
                dependency,
                required_tier: requirement.required_tier,
            });
        }

        state.active.extend(acquired);
        Ok(())
    }

    fn release_dependencies(&self, state: &mut ResourceState, owning_tier: Tier) {
        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.active)
            .into_iter()
            .partition(|active| active.owning_tier == owning_tier);
        state.active = kept;

        for active in released.into_iter().rev() {
            debug!(
                target: "resources",
                "{}: releasing {} at {} (held for {})",
                self.path,
                active.dependency.path(),
                active.required_tier,
                owning_tier
            );
            active.dependency.release(active.required_tier);
        }
    }

    fn roll_back(path: &str, acquired: Vec<ActiveDependency>) {
        for active in acquired.into_iter().rev() {
            debug!(
                target: "resources",
                "{}: rolling back {} at {}",
                path,
                active.dependency.path(),
                active.required_tier
            );
            active.dependency.release(active.required_tier);
        }
    }
}

impl<K: ResourceKind> TieredResource for Resource<K> {
    fn path(&self) -> &str {
        Resource::path(self)
    }

    fn require(&self, tier: Tier) -> bool {
        Resource::require(self, tier)
    }

    fn release(&self, tier: Tier) {
        Resource::release(self, tier)
    }

    fn hold(&self, tier: Tier) -> bool {
        Resource::hold(self, tier)
    }

    fn current_tier(&self) -> Tier {
        Resource::current_tier(self)
    }

    fn request_counts(&self) -> TierCounts {
        Resource::request_counts(self)
    }

    fn active_dependencies(&self) -> Vec<ActiveDependencyInfo> {
        Resource::active_dependencies(self)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

impl<K: ResourceKind> Debug for Resource<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Resource");
        debug.field("path", &self.path);
        match self.state.try_lock() {
            Ok(state) => debug
                .field("current_tier", &state.current_tier)
                .field("request_counts", &state.request_counts),
            Err(_) => debug.field("state", &"<locked>"),
        };
        debug.finish_non_exhaustive()
    }
}

impl<K: ResourceKind> Drop for Resource<K> {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        if state.current_tier > Tier::Drive {
            error!(
                target: "resources",
                "{} dropped while still at {} ({}), the tier acquisition leaked",
                self.path, state.current_tier, state.request_counts
            );
        }

        // don't let the leak cascade into the dependencies
        for active in std::mem::take(&mut state.active).into_iter().rev() {
            active.dependency.release(active.required_tier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        ram_loads: AtomicUsize,
        ram_unloads: AtomicUsize,
        gpu_loads: AtomicUsize,
        gpu_unloads: AtomicUsize,
        fail_gpu: AtomicBool,
        no_gpu: bool,
    }

    impl ResourceKind for Counting {
        fn supports_state(&self, tier: Tier) -> bool {
            !(self.no_gpu && tier == Tier::Gpu)
        }

        fn load_to_ram(&self, _path: &str, _dependencies: &mut Dependencies<'_>) -> anyhow::Result<()> {
            self.ram_loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unload_from_ram(&self, _path: &str) {
            self.ram_unloads.fetch_add(1, Ordering::SeqCst);
        }

        fn load_to_gpu(&self, path: &str) -> anyhow::Result<()> {
            if self.fail_gpu.load(Ordering::SeqCst) {
                anyhow::bail!("upload of {} refused", path);
            }
            self.gpu_loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unload_from_gpu(&self, _path: &str) {
            self.gpu_unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted(path: &str) -> Arc<Resource<Counting>> {
        Arc::new(Resource::new(path, Counting::default()))
    }

    #[test]
    fn walks_the_ladder_one_step_at_a_time() {
        let res = counted("a.png");
        assert!(res.require(Tier::Gpu));
        assert_eq!(res.current_tier(), Tier::Gpu);
        assert_eq!(res.kind().ram_loads.load(Ordering::SeqCst), 1);
        assert_eq!(res.kind().gpu_loads.load(Ordering::SeqCst), 1);

        res.release(Tier::Gpu);
        assert_eq!(res.current_tier(), Tier::Drive);
        assert_eq!(res.kind().gpu_unloads.load(Ordering::SeqCst), 1);
        assert_eq!(res.kind().ram_unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsupported_tier_fails_without_counting() {
        let res = Arc::new(Resource::new(
            "audio.ogg",
            Counting {
                no_gpu: true,
                ..Counting::default()
            },
        ));

        let err = res.try_require(Tier::Gpu).unwrap_err();
        assert!(matches!(err, PromotionError::Unsupported { tier: Tier::Gpu, .. }));
        assert_eq!(res.current_tier(), Tier::Drive);
        assert_eq!(res.request_counts(), TierCounts::default());
        // the Ram step was taken for this request only and undone again
        assert_eq!(res.kind().ram_loads.load(Ordering::SeqCst), 1);
        assert_eq!(res.kind().ram_unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_gpu_hook_keeps_lower_requests() {
        let res = counted("a.png");
        assert!(res.require(Tier::Ram));
        res.kind().fail_gpu.store(true, Ordering::SeqCst);

        let err = res.try_require(Tier::Gpu).unwrap_err();
        assert_eq!(err.tier(), Tier::Gpu);
        assert_eq!(res.current_tier(), Tier::Ram);
        assert_eq!(res.request_counts(), TierCounts::new(0, 1, 0));
        assert_eq!(res.kind().ram_unloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn expired_dependency_fails_promotion() {
        let res = counted("mesh.obj");
        {
            let gone = counted("gone.png");
            assert!(res.register_dependency(Tier::Ram, gone.as_dependency(), Tier::Ram));
        }

        let err = res.try_require(Tier::Ram).unwrap_err();
        assert!(matches!(err, PromotionError::ExpiredDependency { owning_tier: Tier::Ram, .. }));
        assert_eq!(res.current_tier(), Tier::Drive);
        assert_eq!(res.kind().ram_loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_self_and_duplicate_declarations() {
        let res = counted("a.png");
        let dep = counted("b.png");

        assert!(!res.register_dependency(Tier::Gpu, res.as_dependency(), Tier::Ram));
        assert!(!res.register_dependency(Tier::Drive, dep.as_dependency(), Tier::Ram));
        assert!(res.register_dependency(Tier::Gpu, dep.as_dependency(), Tier::Ram));
        assert!(!res.register_dependency(Tier::Gpu, dep.as_dependency(), Tier::Ram));
        assert!(res.register_dependency(Tier::Gpu, dep.as_dependency(), Tier::Gpu));
    }

    #[test]
    fn declaration_view_can_cross_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<Dependencies<'static>>();
    }

    #[test]
    fn hold_only_counts_reached_tiers() {
        let res = counted("a.png");
        assert!(!res.hold(Tier::Ram));
        assert_eq!(res.request_counts(), TierCounts::default());

        assert!(res.require(Tier::Gpu));
        assert!(res.hold(Tier::Ram));
        assert_eq!(res.request_counts(), TierCounts::new(0, 1, 1));

        res.release(Tier::Gpu);
        assert_eq!(res.current_tier(), Tier::Ram);
        assert_eq!(res.kind().gpu_unloads.load(Ordering::SeqCst), 1);
        res.release(Tier::Ram);
        assert_eq!(res.current_tier(), Tier::Drive);
    }

    #[test]
    fn active_dependencies_follow_the_current_tier() {
        let res = counted("material");
        let tex = counted("tex.png");
        res.register_dependency(Tier::Gpu, tex.as_dependency(), Tier::Ram);

        assert!(res.require(Tier::Ram));
        assert!(res.active_dependencies().is_empty());

        assert!(res.require(Tier::Gpu));
        assert_eq!(
            res.active_dependencies(),
            vec![ActiveDependencyInfo {
                owning_tier: Tier::Gpu,
                dependency_path: "tex.png".to_string(),
                required_tier: Tier::Ram,
            }]
        );
        assert_eq!(tex.current_tier(), Tier::Ram);

        res.release(Tier::Gpu);
        assert!(res.active_dependencies().is_empty());
        assert_eq!(tex.current_tier(), Tier::Drive);
        assert_eq!(res.current_tier(), Tier::Ram);

        res.release(Tier::Ram);
    }
}
