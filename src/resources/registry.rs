use crate::resources::kind::ResourceKind;
use crate::resources::manager::ResourceManager;
use crate::resources::resource::{ActiveDependencyInfo, Resource};
use crate::resources::tier::{Tier, TierCounts};
use dashmap::DashMap;
use itertools::Itertools;
use log::{info, trace, warn};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};

/// Builds the concrete kind for a (canonical) key on first lookup.
pub trait ResourceGenerator<K: ResourceKind> {
    fn generate(&self, path: &str) -> K;

    /// Runs once right after `resource` was created, before anybody else can see it. The place to
    /// declare dependencies every resource of the kind has.
    fn declare(&self, resource: &Arc<Resource<K>>) {
        let _ = resource;
    }

    /// Maps textually different keys of the same asset onto one key.
    fn canonicalize(&self, key: &str) -> String {
        canonicalize_path(key)
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub path: String,
    pub tier: Tier,
    pub request_counts: TierCounts,
    pub dependencies: Vec<ActiveDependencyInfo>,
}

/// Deduplicates resources of one kind by canonical key.
///
/// The registry only creates and hands out shared handles, it never changes a resource's tier on
/// its own. Entries are kept for the registry's lifetime, there is no eviction.
pub struct ResourceRegistry<G: ResourceGenerator<K>, K: ResourceKind> {
    resources: DashMap<String, Arc<Resource<K>>>,
    generator: G,
    manager: Option<Weak<ResourceManager>>,
    name: &'static str,
}

impl<G: ResourceGenerator<K>, K: ResourceKind> ResourceRegistry<G, K> {
    pub fn new(name: &'static str, generator: G) -> Self {
        Self {
            resources: DashMap::with_capacity(100),
            generator,
            manager: None,
            name,
        }
    }

    /// Every resource created by this registry will load/unload through `manager`.
    pub fn with_manager(name: &'static str, generator: G, manager: &Arc<ResourceManager>) -> Self {
        Self {
            manager: Some(Arc::downgrade(manager)),
            ..Self::new(name, generator)
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Returns the shared resource for `key`, creating it (at Drive, no requests) on first lookup.
    /// Concurrent lookups of the same key construct it exactly once.
    pub fn get_or_create(&self, key: &str) -> Arc<Resource<K>> {
        let canonical = self.generator.canonicalize(key);
        if let Some(existing) = self.resources.get(&canonical) {
            return Arc::clone(existing.value());
        }

        // the shard stays write-locked while generating and declaring, so the generator must not
        // look up this registry again
        let entry = self.resources.entry(canonical.clone()).or_insert_with(|| {
            trace!(target: "resources::registry", "{}: creating {}", self.name, canonical);
            let resource = Resource::new(canonical.as_str(), self.generator.generate(&canonical));
            if let Some(manager) = self.manager.as_ref().and_then(Weak::upgrade) {
                resource.set_manager(&manager);
            }
            let resource = Arc::new(resource);
            self.generator.declare(&resource);
            resource
        });
        Arc::clone(entry.value())
    }

    /// Lookup without creating.
    pub fn get(&self, key: &str) -> Option<Arc<Resource<K>>> {
        let canonical = self.generator.canonicalize(key);
        self.resources
            .get(&canonical)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn require(&self, key: &str, tier: Tier) -> bool {
        self.get_or_create(key).require(tier)
    }

    pub fn release(&self, key: &str, tier: Tier) {
        match self.get(key) {
            Some(resource) => resource.release(tier),
            None => warn!(
                target: "resources::registry",
                "{}: release({}) of unknown resource {}",
                self.name, tier, key
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// All entries, sorted by path.
    pub fn snapshot(&self) -> Vec<ResourceSnapshot> {
        // collect the handles first, so no shard lock is held while locking resources
        let resources = self
            .resources
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect_vec();

        resources
            .into_iter()
            .map(|resource| ResourceSnapshot {
                path: resource.path().to_string(),
                tier: resource.current_tier(),
                request_counts: resource.request_counts(),
                dependencies: resource.active_dependencies(),
            })
            .sorted_by(|a, b| a.path.cmp(&b.path))
            .collect_vec()
    }

    pub fn dump_state(&self) {
        info!(target: "resources::registry", "{} ({} entries):", self.name, self.len());
        for entry in self.snapshot() {
            info!(
                target: "resources::registry",
                "  {} tier={} {}",
                entry.path, entry.tier, entry.request_counts
            );
            for dependency in &entry.dependencies {
                info!(
                    target: "resources::registry",
                    "    owning={} -> {} @{}",
                    dependency.owning_tier, dependency.dependency_path, dependency.required_tier
                );
            }
        }
    }
}

/// Absolute, lexically normalized path with forward slashes. Doesn't touch the file system, so
/// assets that don't exist (yet) still dedupe.
pub fn canonicalize_path(key: &str) -> String {
    let unified = key.replace('\\', "/");
    match std::path::absolute(&unified) {
        Ok(absolute) => path_to_key(&normalize_path(&absolute)),
        Err(err) => {
            warn!(target: "resources::registry", "Could not make {} absolute: {}", key, err);
            unified
        }
    }
}

/// Resolves `.` and `..` components without following symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                ) {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn path_to_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
