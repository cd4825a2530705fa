use anyhow::bail;
use dashmap::DashMap;
use log::{trace, warn};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Opaque handle of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuHandle(u64);

impl GpuHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Display for GpuHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The graphics device as far as resources are concerned: somewhere to put bytes and take them
/// back out. Uploads are expected to happen on the owning context.
pub trait GpuDevice: Send + Sync {
    fn upload(&self, label: &str, bytes: &[u8]) -> anyhow::Result<GpuHandle>;

    fn free(&self, handle: GpuHandle);
}

/// A device without a device: hands out handles and keeps book of what is alive, optionally within
/// a byte budget. Used headless and in tests.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_handle: AtomicU64,
    live: DashMap<GpuHandle, (String, usize)>,
    live_bytes: AtomicUsize,
    budget: Option<usize>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads fail once `budget` bytes are alive.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget: Some(budget),
            ..Self::default()
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub fn label_of(&self, handle: GpuHandle) -> Option<String> {
        self.live.get(&handle).map(|entry| entry.0.clone())
    }
}

impl GpuDevice for HeadlessDevice {
    fn upload(&self, label: &str, bytes: &[u8]) -> anyhow::Result<GpuHandle> {
        if let Some(budget) = self.budget {
            let reserved = self.live_bytes.fetch_add(bytes.len(), Ordering::SeqCst);
            if reserved + bytes.len() > budget {
                self.live_bytes.fetch_sub(bytes.len(), Ordering::SeqCst);
                bail!(
                    "out of device memory uploading {} ({} bytes, {} of {} in use)",
                    label,
                    bytes.len(),
                    reserved,
                    budget
                );
            }
        } else {
            self.live_bytes.fetch_add(bytes.len(), Ordering::SeqCst);
        }

        let handle = GpuHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.insert(handle, (label.to_string(), bytes.len()));
        trace!("Uploaded {} ({} bytes) as {}", label, bytes.len(), handle);
        Ok(handle)
    }

    fn free(&self, handle: GpuHandle) {
        match self.live.remove(&handle) {
            Some((_, (label, size))) => {
                self.live_bytes.fetch_sub(size, Ordering::SeqCst);
                trace!("Freed {} ({})", handle, label);
            }
            None => warn!("Freeing unknown device allocation {}", handle),
        }
    }
}
