// ============================================================================
// context.rs — process-wide state and the load/match/execute phase mutex
// ============================================================================
//
// `Context` bundles everything that's genuinely process-wide: the target
// set, the scope tree, the rule table, and global variables. It also owns
// the phase mutex (§5): the engine is always in exactly one of three
// phases, and entering a phase other than the current one blocks until
// every thread currently inside the old phase has left it. This is a
// readers-writer lock in spirit (many threads share "match" or "execute",
// nobody else runs concurrently with "load"), implemented directly on top
// of a `Mutex`/`Condvar` pair rather than `std::sync::RwLock`, since we also
// need to track *which* phase is active, not just whether it's held
// exclusively or shared.
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, RwLock};

use crate::rule::{OperationMode, RuleSet, OP_CLEAN, OP_UPDATE};
use crate::scope::ScopeMap;
use crate::target::Target;
use crate::target::TargetSet;
use crate::target::TargetTypeTable;
use crate::variable::{PoolMode, VariablePool};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Load,
    Match,
    Execute,
}

struct PhaseState {
    phase: RunPhase,
    /// Number of threads currently holding the active phase (shared for
    /// Match/Execute; Load is typically held by one thread at a time by
    /// caller convention, but nothing here enforces that). Zero means no
    /// phase is currently held, so the next `lock()` call may switch it.
    holders: u64,
}

pub struct RunPhaseMutex {
    state: Mutex<PhaseState>,
    changed: Condvar,
}

impl Default for RunPhaseMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RunPhaseMutex {
    pub fn new() -> Self {
        RunPhaseMutex {
            state: Mutex::new(PhaseState { phase: RunPhase::Load, holders: 0 }),
            changed: Condvar::new(),
        }
    }

    pub fn current(&self) -> RunPhase {
        self.state.lock().unwrap().phase
    }

    /// Blocks until `phase` is active and joins it as a holder. Returns a
    /// guard that releases on drop.
    pub fn lock(&self, phase: RunPhase) -> PhaseGuard<'_> {
        let mut g = self.state.lock().unwrap();
        loop {
            if g.phase == phase {
                g.holders += 1;
                return PhaseGuard { mutex: self };
            }
            if g.holders == 0 {
                g.phase = phase;
                g.holders = 1;
                self.changed.notify_all();
                return PhaseGuard { mutex: self };
            }
            g = self.changed.wait(g).unwrap();
        }
    }

    fn unlock(&self) {
        let mut g = self.state.lock().unwrap();
        g.holders -= 1;
        if g.holders == 0 {
            self.changed.notify_all();
        }
    }

    /// Releases this thread's hold on the current phase without acquiring
    /// any other phase. Paired with `resume_phase` to bracket the one
    /// documented exception to normal phase discipline: a rule forcing a
    /// prerequisite's recipe to run immediately during match (`dyndep`'s
    /// `update_during_match`), which briefly needs `Execute` to itself be
    /// active rather than merely tolerated.
    pub(crate) fn yield_phase(&self) {
        let mut g = self.state.lock().unwrap();
        g.holders -= 1;
        if g.holders == 0 {
            self.changed.notify_all();
        }
    }

    pub(crate) fn resume_phase(&self, phase: RunPhase) {
        let mut g = self.state.lock().unwrap();
        loop {
            if g.phase == phase {
                g.holders += 1;
                return;
            }
            if g.holders == 0 {
                g.phase = phase;
                g.holders = 1;
                self.changed.notify_all();
                return;
            }
            g = self.changed.wait(g).unwrap();
        }
    }
}

pub struct PhaseGuard<'a> {
    mutex: &'a RunPhaseMutex,
}

impl<'a> Drop for PhaseGuard<'a> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<'a> PhaseGuard<'a> {
    /// Releases this phase and immediately blocks waiting to re-enter it,
    /// giving other phases a fair chance to run in between. Used by the
    /// scheduler to switch from match to execute without holding up a
    /// sibling tree that wants to load.
    pub fn switch(self, mutex: &'a RunPhaseMutex, to: RunPhase) -> PhaseGuard<'a> {
        drop(self);
        mutex.lock(to)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct Context {
    pub phase: RunPhaseMutex,
    pub targets: TargetSet,
    pub target_types: TargetTypeTable,
    pub scopes: ScopeMap,
    pub rules: RuleSet,
    pub global_vars: Mutex<VariablePool>,
    load_generation: AtomicU64,
    operation_modes: RwLock<HashMap<u16, OperationMode>>,
    /// §4.5 "Post-hoc prerequisites": targets a rule discovered it also
    /// needs only after the main graph for the current action was already
    /// built, accumulated here under a single low-contention mutex (per
    /// §5's "post-hoc target list uses a single mutex, expected low
    /// contention") and drained by `engine::run_post_hoc_pass` in a second
    /// pass after the main graph completes.
    post_hoc: Mutex<Vec<Arc<Target>>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let mut operation_modes = HashMap::new();
        operation_modes.insert(OP_UPDATE, OperationMode::First);
        operation_modes.insert(OP_CLEAN, OperationMode::Last);
        Context {
            phase: RunPhaseMutex::new(),
            targets: TargetSet::new(),
            target_types: TargetTypeTable::new(),
            scopes: ScopeMap::new(),
            rules: RuleSet::new(),
            global_vars: Mutex::new(VariablePool::new(PoolMode::SharedLoadOnly)),
            load_generation: AtomicU64::new(0),
            operation_modes: RwLock::new(operation_modes),
            post_hoc: Mutex::new(Vec::new()),
        }
    }

    /// A rule's `apply` calls this to register a post-hoc prerequisite
    /// target (one it learned about only while applying, not while the
    /// main prerequisite list was being built). Duplicate registrations of
    /// the same target are harmless: `TargetSet` dedup means they're
    /// pointer-equal, and `run_post_hoc_pass` match/executes each target at
    /// most once per action regardless of how many times it shows up here.
    pub fn register_post_hoc(&self, target: Arc<Target>) {
        self.post_hoc.lock().unwrap().push(target);
    }

    /// Drains everything registered since the last drain. Iterated to a
    /// fixed point by the caller: a post-hoc target's own `apply` may
    /// register further post-hoc targets, which is explicitly permitted
    /// by §4.5.
    pub(crate) fn drain_post_hoc(&self) -> Vec<Arc<Target>> {
        std::mem::take(&mut *self.post_hoc.lock().unwrap())
    }

    /// The execution mode registered for `operation` (§4.5), defaulting to
    /// `First` for an operation nobody has registered a mode for.
    pub fn operation_mode(&self, operation: u16) -> OperationMode {
        self.operation_modes.read().unwrap().get(&operation).copied().unwrap_or(OperationMode::First)
    }

    /// Lets a front-end register a custom operation (e.g. `install`,
    /// `test`) with its execution mode, the same way it would register
    /// rules for a new target type.
    pub fn set_operation_mode(&self, operation: u16, mode: OperationMode) {
        self.operation_modes.write().unwrap().insert(operation, mode);
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn new_for_test() -> Self {
        Self::new()
    }

    pub fn load_generation(&self) -> u64 {
        self.load_generation.load(Ordering::Acquire)
    }

    /// Bumps the load generation. Called once per top-level `update`/`clean`
    /// invocation that starts a fresh load phase, and used by caches that
    /// must invalidate anything computed under a previous generation (see
    /// the per-target-type scope-variable cache in `scope.rs`'s design
    /// notes).
    pub fn bump_load_generation(&self) -> u64 {
        self.load_generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}
