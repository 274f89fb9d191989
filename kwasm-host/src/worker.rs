//! Worker threads.
//!
//! A worker is a fresh context on its own OS thread, attached to the same
//! shared memory and module as the context that asked for it. Spawning is
//! fire-and-forget: the requesting guest gets 0 back as soon as the thread
//! exists, and whatever happens during bootstrap stays with that worker.

use crate::abi::{
    INIT_TLS_EXPORT, RESERVE_SPACE_EXPORT, SET_STACK_POINTER_EXPORT, STACK_POINTER_GLOBAL,
    THREAD_START_EXPORT, WORKER_ENTRY_EXPORT, guest_call,
};
use crate::context::{ContextId, ContextState, SharedHost};
use crate::host::link_context;
use crate::memory::{LinearMemory, MemoryBridge};
use dashmap::DashMap;
use kwasm_core::error::{KwasmError, Result};
use kwasm_core::protocol::WorkerLaunch;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use wasmtime::{Instance, Mutability, Store, Val};

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerPhase {
    /// Id allocated, thread not requested yet.
    Idle,
    /// Thread requested from the OS.
    Spawning,
    /// Instantiating the module and preparing the stack and TLS.
    Bootstrapping,
    /// Inside the guest's entry point.
    Running,
    /// Entry point returned.
    Finished,
    /// Bootstrap or the entry point failed.
    Failed,
}

impl WorkerPhase {
    /// Whether the worker still occupies a thread.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Spawning | Self::Bootstrapping | Self::Running)
    }
}

/// Every worker a host has spawned.
pub struct WorkerPool {
    next_id: AtomicU32,
    /// Threads claimed and not yet exited.
    active: AtomicU32,
    phases: DashMap<ContextId, WorkerPhase>,
    handles: Mutex<Vec<(ContextId, JoinHandle<()>)>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self {
            // 0 is the main context.
            next_id: AtomicU32::new(1),
            active: AtomicU32::new(0),
            phases: DashMap::new(),
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("spawned", &self.spawned())
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase of a worker, if the id was ever allocated.
    pub fn phase(&self, worker: ContextId) -> Option<WorkerPhase> {
        self.phases.get(&worker).map(|phase| *phase)
    }

    /// All workers and their phases, ordered by id.
    pub fn snapshot(&self) -> Vec<(ContextId, WorkerPhase)> {
        let mut all: Vec<_> = self
            .phases
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    /// Number of workers ever spawned.
    pub fn spawned(&self) -> usize {
        self.phases.len()
    }

    /// Number of workers still occupying a thread.
    pub fn live(&self) -> usize {
        self.active.load(Ordering::Acquire) as usize
    }

    /// Reserve a thread slot, failing when `limit` are already taken.
    ///
    /// Check and increment are one atomic step, so concurrent spawns can
    /// never overshoot the limit.
    fn claim_slot(&self, limit: Option<u32>) -> Result<()> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(limit) if n >= limit => None,
                _ => Some(n + 1),
            })
            .map(|_| ())
            .map_err(|_| KwasmError::ThreadsUnavailable {
                cause: format!("all {} workers are busy", limit.unwrap_or_default()),
            })
    }

    fn release_slot(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    fn set_phase(&self, worker: ContextId, phase: WorkerPhase) {
        self.phases.insert(worker, phase);
        tracing::debug!(worker, ?phase, "worker phase");
    }

    /// Wait for every worker spawned so far, including workers spawned by
    /// workers while waiting. Returns how many threads were joined.
    pub fn join_all(&self) -> usize {
        let mut joined = 0;
        loop {
            let pending = std::mem::take(&mut *self.handles.lock());
            if pending.is_empty() {
                return joined;
            }
            for (worker, handle) in pending {
                if handle.join().is_err() {
                    tracing::error!(worker, "worker thread panicked");
                    self.set_phase(worker, WorkerPhase::Failed);
                }
                joined += 1;
            }
        }
    }

    /// Start a worker for `launch`. Returns the new worker's id.
    pub(crate) fn spawn(
        &self,
        shared: &Arc<SharedHost>,
        launch: WorkerLaunch,
    ) -> Result<ContextId> {
        let config = shared.runtime().config();
        if !config.threads_enabled {
            return Err(KwasmError::ThreadsUnavailable {
                cause: "threads are disabled".to_string(),
            });
        }
        if shared.memory.shared().is_none() {
            return Err(KwasmError::ThreadsUnavailable {
                cause: "the module does not import shared memory".to_string(),
            });
        }
        self.claim_slot(config.max_workers)?;

        let worker = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.set_phase(worker, WorkerPhase::Idle);
        self.set_phase(worker, WorkerPhase::Spawning);

        let thread_shared = Arc::clone(shared);
        let handle = std::thread::Builder::new()
            .name(format!("kwasm-worker-{worker}"))
            .spawn(move || run_worker(thread_shared, worker, launch))
            .map_err(|e| {
                self.release_slot();
                self.set_phase(worker, WorkerPhase::Failed);
                KwasmError::WorkerSpawn {
                    worker,
                    cause: e.to_string(),
                }
            })?;

        self.handles.lock().push((worker, handle));
        Ok(worker)
    }
}

/// Gives the thread slot back when the worker thread exits, panics included.
struct ActiveSlot<'a>(&'a WorkerPool);

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.release_slot();
    }
}

fn run_worker(shared: Arc<SharedHost>, worker: ContextId, launch: WorkerLaunch) {
    let _slot = ActiveSlot(shared.workers());
    let span = crate::instrument_context!(worker, "worker");
    let _enter = span.enter();

    shared.workers().set_phase(worker, WorkerPhase::Bootstrapping);
    match bootstrap(&shared, worker, launch) {
        Ok(()) => {
            shared.workers().set_phase(worker, WorkerPhase::Finished);
            tracing::info!(worker, "worker finished");
        }
        Err(err) => {
            shared.workers().set_phase(worker, WorkerPhase::Failed);
            tracing::error!(worker, code = err.code(), "worker failed: {err}");
        }
    }
}

fn bootstrap(shared: &Arc<SharedHost>, worker: ContextId, launch: WorkerLaunch) -> Result<()> {
    let mut store = Store::new(
        shared.runtime().engine(),
        ContextState::new(worker, Arc::clone(shared)),
    );
    let (linker, memory) = link_context(&mut store, shared, true)?;
    let instance = linker
        .instantiate(&mut store, shared.module().module())
        .map_err(|e| KwasmError::InstantiationFailure {
            context: worker,
            cause: format!("{e:#}"),
        })?;

    let memory = memory.ok_or_else(|| KwasmError::ThreadsUnavailable {
        cause: "no shared memory to attach".to_string(),
    })?;
    bind_bridge(&mut store, &instance, memory);

    enter_worker(&mut store, &instance, launch, || {
        shared.workers().set_phase(worker, WorkerPhase::Running);
    })
}

/// Bind a memory bridge, with the reserve-space export if the guest has one.
pub(crate) fn bind_bridge(
    store: &mut Store<ContextState>,
    instance: &Instance,
    memory: LinearMemory,
) {
    let mut bridge = MemoryBridge::new(memory);
    if let Ok(reserve) = instance.get_typed_func::<u32, u32>(&mut *store, RESERVE_SPACE_EXPORT) {
        bridge = bridge.with_reserve(reserve);
    }
    store.data_mut().bind_bridge(bridge);
}

/// Run the guest's thread start sequence.
///
/// `kwasm_thread_start(stack_pointer, tls_pointer, entry)` replaces the whole
/// sequence when exported. Otherwise: stack pointer, then TLS, then entry.
/// `on_running` fires right before guest code for the thread begins.
pub(crate) fn enter_worker(
    store: &mut Store<ContextState>,
    instance: &Instance,
    launch: WorkerLaunch,
    on_running: impl FnOnce(),
) -> Result<()> {
    if let Ok(start) =
        instance.get_typed_func::<(u32, u32, u32), ()>(&mut *store, THREAD_START_EXPORT)
    {
        on_running();
        return guest_call(
            THREAD_START_EXPORT,
            start.call(
                &mut *store,
                (launch.stack_pointer, launch.tls_pointer, launch.entry_point),
            ),
        );
    }

    set_stack_pointer(store, instance, launch.stack_pointer)?;

    if let Ok(init_tls) = instance.get_typed_func::<u32, ()>(&mut *store, INIT_TLS_EXPORT) {
        guest_call(INIT_TLS_EXPORT, init_tls.call(&mut *store, launch.tls_pointer))?;
    } else {
        tracing::debug!("guest has no {INIT_TLS_EXPORT}; skipping TLS setup");
    }

    let entry = instance
        .get_typed_func::<u32, ()>(&mut *store, WORKER_ENTRY_EXPORT)
        .map_err(|_| KwasmError::missing_export(WORKER_ENTRY_EXPORT))?;
    on_running();
    guest_call(WORKER_ENTRY_EXPORT, entry.call(&mut *store, launch.entry_point))
}

fn set_stack_pointer(
    store: &mut Store<ContextState>,
    instance: &Instance,
    stack_pointer: u32,
) -> Result<()> {
    if let Ok(set) = instance.get_typed_func::<u32, ()>(&mut *store, SET_STACK_POINTER_EXPORT) {
        return guest_call(SET_STACK_POINTER_EXPORT, set.call(&mut *store, stack_pointer));
    }

    match instance.get_global(&mut *store, STACK_POINTER_GLOBAL) {
        Some(global) if global.ty(&*store).mutability() == Mutability::Var => global
            .set(&mut *store, Val::I32(stack_pointer as i32))
            .map_err(|e| KwasmError::GuestTrap {
                function: STACK_POINTER_GLOBAL.to_string(),
                cause: format!("{e:#}"),
            }),
        _ => {
            tracing::warn!(
                stack_pointer,
                "guest exports neither {SET_STACK_POINTER_EXPORT} nor a mutable \
                 {STACK_POINTER_GLOBAL}; worker keeps the module's initial stack pointer"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn slots_respect_the_limit() {
        let pool = WorkerPool::new();
        pool.claim_slot(Some(2)).unwrap();
        pool.claim_slot(Some(2)).unwrap();
        let err = pool.claim_slot(Some(2)).unwrap_err();
        assert!(matches!(err, KwasmError::ThreadsUnavailable { .. }));
        assert_eq!(pool.live(), 2);

        pool.release_slot();
        assert_eq!(pool.live(), 1);
        pool.claim_slot(Some(2)).unwrap();
        assert_eq!(pool.live(), 2);
    }

    #[test]
    fn unlimited_slots() {
        let pool = WorkerPool::new();
        for _ in 0..64 {
            pool.claim_slot(None).unwrap();
        }
        assert_eq!(pool.live(), 64);
    }

    #[test]
    fn concurrent_claims_never_exceed_the_limit() {
        const THREADS: usize = 8;
        let pool = WorkerPool::new();
        let start = Barrier::new(THREADS);
        let granted = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    start.wait();
                    if pool.claim_slot(Some(3)).is_ok() {
                        granted.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(granted.load(Ordering::Relaxed), 3);
        assert_eq!(pool.live(), 3);
    }

    #[test]
    fn live_phases() {
        assert!(WorkerPhase::Running.is_live());
        assert!(WorkerPhase::Spawning.is_live());
        assert!(!WorkerPhase::Finished.is_live());
        assert!(!WorkerPhase::Idle.is_live());
    }
}
