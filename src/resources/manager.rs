use crate::resources::loading_thread::LoadingThread;
use crate::resources::resource::ResourceRef;
use crate::resources::tier::Tier;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Load,
    Unload,
}

/// Where a transition into an owning-context tier currently stands.
///
/// Such a transition is split in two: the steps below the tier run on the loading thread
/// (`Staging`), the step into or out of the tier itself on the owning context (`Finishing`).
/// Leaving the tier hands the rest of the walk back to the loading thread (`Settling`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Runs the whole transition wherever it is executed.
    Complete,
    Staging,
    /// `held` is a request taken while staging, dropped once the transition is done.
    Finishing { held: Option<Tier> },
    /// Drops the request that kept the lower tier resident while the owning context left its tier.
    Settling { held: Tier },
}

/// What running a [`PendingOperation`] produced.
pub struct Outcome {
    pub succeeded: bool,
    /// The next phase of a split transition, to be queued on the other side.
    pub handoff: Option<PendingOperation>,
}

impl Outcome {
    fn done(succeeded: bool) -> Self {
        Self {
            succeeded,
            handoff: None,
        }
    }
}

/// A queued tier transition. Holds a strong reference, so a queued resource can't disappear
/// before the operation ran (or was discarded).
pub struct PendingOperation {
    resource: ResourceRef,
    kind: OperationKind,
    tier: Tier,
    phase: Phase,
}

impl PendingOperation {
    pub fn new(resource: ResourceRef, kind: OperationKind, tier: Tier) -> Self {
        Self {
            resource,
            kind,
            tier,
            phase: Phase::Complete,
        }
    }

    /// The first half of a transition split between the loading thread and the owning context.
    pub fn staged(resource: ResourceRef, kind: OperationKind, tier: Tier) -> Self {
        Self {
            resource,
            kind,
            tier,
            phase: Phase::Staging,
        }
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn next(&self, phase: Phase) -> PendingOperation {
        Self {
            resource: self.resource.clone(),
            kind: self.kind,
            tier: self.tier,
            phase,
        }
    }

    /// Runs this phase of the transition on the calling thread. Unloading can't fail.
    pub fn execute(&self) -> Outcome {
        let below = self.tier.previous();
        match (self.kind, self.phase) {
            (OperationKind::Load, Phase::Complete) => Outcome::done(self.resource.require(self.tier)),
            (OperationKind::Unload, Phase::Complete) => {
                self.resource.release(self.tier);
                Outcome::done(true)
            }
            (OperationKind::Load, Phase::Staging) => {
                if !self.resource.require(below) {
                    return Outcome::done(false);
                }
                Outcome {
                    succeeded: true,
                    handoff: Some(self.next(Phase::Finishing { held: Some(below) })),
                }
            }
            (OperationKind::Unload, Phase::Staging) => Outcome {
                succeeded: true,
                handoff: Some(self.next(Phase::Finishing { held: None })),
            },
            (OperationKind::Load, Phase::Finishing { held }) => {
                let succeeded = self.resource.require(self.tier);
                if let Some(held) = held {
                    self.resource.release(held);
                }
                Outcome::done(succeeded)
            }
            (OperationKind::Unload, Phase::Finishing { .. }) => {
                // keep the lower tier while leaving this one, the loading thread drops it
                let held = self.resource.hold(below);
                self.resource.release(self.tier);
                Outcome {
                    succeeded: true,
                    handoff: held.then(|| self.next(Phase::Settling { held: below })),
                }
            }
            (_, Phase::Settling { held }) => {
                self.resource.release(held);
                Outcome::done(true)
            }
        }
    }

    /// Drops the operation without running it, giving back any request it holds.
    pub(crate) fn discard(self, reason: &str) {
        warn!(target: "resources::loading", "Discarding {} {}", self, reason);
        match self.phase {
            Phase::Finishing { held: Some(held) } | Phase::Settling { held } => self.resource.release(held),
            _ => {}
        }
    }
}

impl Display for PendingOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({}) of {}", self.kind, self.tier, self.resource.path())?;
        match self.phase {
            Phase::Complete => Ok(()),
            Phase::Staging => write!(f, " [staging]"),
            Phase::Finishing { .. } => write!(f, " [finishing]"),
            Phase::Settling { held } => write!(f, " [settling at {}]", held),
        }
    }
}

type OperationQueue = Arc<Mutex<VecDeque<PendingOperation>>>;

fn lock_queue(queue: &Mutex<VecDeque<PendingOperation>>) -> MutexGuard<'_, VecDeque<PendingOperation>> {
    queue.lock().expect("Owning queue lock")
}

/// The asynchronous boundary between code requesting tiers and code performing the transitions.
///
/// There are two queues: the background queue is drained by a dedicated [`LoadingThread`] and
/// takes everything that may run anywhere (decoding into RAM). The owning queue takes transitions
/// that have to run on one specific thread (typically the one owning the device context) and is
/// only drained when that thread calls [`ResourceManager::process_owning_queue`].
///
/// A split transition moves between the two: its staging half runs on the loading thread and then
/// queues its finishing half for the owning context, which in turn may hand a settling step back.
/// Apart from that there is no ordering between the two queues.
pub struct ResourceManager {
    loading_thread: LoadingThread,
    owning_queue: OperationQueue,
    owning_thread: OnceLock<ThreadId>,
}

impl ResourceManager {
    pub fn new() -> std::io::Result<Arc<Self>> {
        info!(target: "resources::loading", "Initializing ResourceManager with parallel loading");
        let owning_queue = OperationQueue::default();
        let handoff_queue = owning_queue.clone();
        let loading_thread = LoadingThread::new(move |operation: PendingOperation| {
            debug!(target: "resources::loading", "Handing {} to the owning context", operation);
            lock_queue(&handoff_queue).push_back(operation);
        })?;

        Ok(Arc::new(Self {
            loading_thread,
            owning_queue,
            owning_thread: OnceLock::new(),
        }))
    }

    pub fn queue_load(&self, resource: ResourceRef, tier: Tier) {
        self.queue_background(PendingOperation::new(resource, OperationKind::Load, tier));
    }

    pub fn queue_unload(&self, resource: ResourceRef, tier: Tier) {
        self.queue_background(PendingOperation::new(resource, OperationKind::Unload, tier));
    }

    pub fn queue_owning_load(&self, resource: ResourceRef, tier: Tier) {
        self.queue_owning(PendingOperation::new(resource, OperationKind::Load, tier));
    }

    pub fn queue_owning_unload(&self, resource: ResourceRef, tier: Tier) {
        self.queue_owning(PendingOperation::new(resource, OperationKind::Unload, tier));
    }

    pub fn queue_background(&self, operation: PendingOperation) {
        debug!(target: "resources::loading", "Queueing {} on the loading thread", operation);
        self.loading_thread.queue_operation(operation);
    }

    pub fn queue_owning(&self, operation: PendingOperation) {
        debug!(target: "resources::loading", "Queueing {} for the owning context", operation);
        lock_queue(&self.owning_queue).push_back(operation);
    }

    /// Runs every operation that was queued for the owning context when this was called and
    /// returns how many ran. Operations queued while draining wait for the next call.
    pub fn process_owning_queue(&self) -> usize {
        let current = std::thread::current().id();
        let owner = *self.owning_thread.get_or_init(|| current);
        if owner != current {
            warn!(
                target: "resources::loading",
                "The owning queue is drained from {:?}, but was first drained from {:?}",
                current, owner
            );
        }

        let operations = std::mem::take(&mut *lock_queue(&self.owning_queue));
        let count = operations.len();
        for operation in operations {
            let outcome = operation.execute();
            if outcome.succeeded {
                trace!(target: "resources::loading", "Processed {}", operation);
            } else {
                warn!(target: "resources::loading", "Failed to process {}", operation);
            }
            if let Some(handoff) = outcome.handoff {
                self.queue_background(handoff);
            }
        }
        count
    }

    /// Blocks until the background queue has been drained. Doesn't touch the owning queue.
    pub fn wait_idle(&self) {
        self.loading_thread.wait_idle();
    }

    pub fn pending_background(&self) -> usize {
        self.loading_thread.pending()
    }

    pub fn pending_owning(&self) -> usize {
        lock_queue(&self.owning_queue).len()
    }

    /// Stops the loading thread, see [`LoadingThread::shutdown`].
    pub fn shutdown(&self) {
        self.loading_thread.shutdown();
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.loading_thread.shutdown();

        let operations = match self.owning_queue.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for operation in operations {
            operation.discard("for the owning context");
        }
        info!(target: "resources::loading", "Destroying ResourceManager");
    }
}
