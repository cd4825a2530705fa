#![allow(dead_code)]

use asset_tiers::{Dependencies, Resource, ResourceGenerator, ResourceKind, Tier};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};

/// A resource kind that only counts its hook invocations and fails on demand.
#[derive(Default)]
pub struct Counting {
    pub ram_loads: AtomicUsize,
    pub ram_unloads: AtomicUsize,
    pub gpu_loads: AtomicUsize,
    pub gpu_unloads: AtomicUsize,
    pub fail_ram: AtomicBool,
    pub fail_gpu: AtomicBool,
    pub panic_ram: AtomicBool,
    pub panic_ram_unload: AtomicBool,
    /// Every Ram load waits on this barrier.
    pub ram_barrier: Option<Arc<Barrier>>,
    /// Every Ram load reports on `entered` and then blocks until `gate` yields.
    pub entered: Mutex<Option<Sender<()>>>,
    pub gate: Mutex<Option<Receiver<()>>>,
    /// Whether Gpu transitions go to the owning queue.
    pub gpu_on_owning_context: bool,
}

impl Counting {
    pub fn new() -> Self {
        Self {
            gpu_on_owning_context: true,
            ..Self::default()
        }
    }

    pub fn failing_gpu() -> Self {
        let kind = Self::new();
        kind.fail_gpu.store(true, Ordering::SeqCst);
        kind
    }

    pub fn counts(&self) -> [usize; 4] {
        [
            self.ram_loads.load(Ordering::SeqCst),
            self.ram_unloads.load(Ordering::SeqCst),
            self.gpu_loads.load(Ordering::SeqCst),
            self.gpu_unloads.load(Ordering::SeqCst),
        ]
    }
}

impl ResourceKind for Counting {
    fn load_to_ram(&self, path: &str, _dependencies: &mut Dependencies<'_>) -> anyhow::Result<()> {
        if let Some(barrier) = &self.ram_barrier {
            barrier.wait();
        }
        if let Some(entered) = self.entered.lock().unwrap().as_ref() {
            let _ = entered.send(());
        }
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            let _ = gate.recv();
        }

        if self.panic_ram.load(Ordering::SeqCst) {
            panic!("decoder blew up on {}", path);
        }
        if self.fail_ram.load(Ordering::SeqCst) {
            anyhow::bail!("decoding {} failed", path);
        }
        self.ram_loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unload_from_ram(&self, path: &str) {
        if self.panic_ram_unload.load(Ordering::SeqCst) {
            panic!("freeing {} blew up", path);
        }
        self.ram_unloads.fetch_add(1, Ordering::SeqCst);
    }

    fn load_to_gpu(&self, path: &str) -> anyhow::Result<()> {
        if self.fail_gpu.load(Ordering::SeqCst) {
            anyhow::bail!("uploading {} failed", path);
        }
        self.gpu_loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unload_from_gpu(&self, _path: &str) {
        self.gpu_unloads.fetch_add(1, Ordering::SeqCst);
    }

    fn requires_owning_context(&self, tier: Tier) -> bool {
        self.gpu_on_owning_context && tier == Tier::Gpu
    }
}

pub fn counted(path: &str) -> Arc<Resource<Counting>> {
    Arc::new(Resource::new(path, Counting::new()))
}

#[derive(Default)]
pub struct CountingGenerator {
    pub created: AtomicUsize,
}

impl ResourceGenerator<Counting> for CountingGenerator {
    fn generate(&self, _path: &str) -> Counting {
        self.created.fetch_add(1, Ordering::SeqCst);
        Counting::new()
    }
}
