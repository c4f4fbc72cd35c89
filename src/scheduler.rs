// ============================================================================
// scheduler.rs — the parallel, phase-aware driver
// ============================================================================
//
// `engine::execute_sync` is correct but single-threaded. This module fans a
// batch of top-level targets out across up to `jobs` concurrent workers.
// Per the design notes, this is deliberately NOT built on a generic
// data-parallel library (no `rayon`): the hand-off between "I have a slot"
// and "I don't" is a plain blocking wait on a counter (`JobSlots`), the same
// shape as the touched/tried/matched/applied/executed counter in
// `target.rs`'s opstate, just counting concurrency instead of progress.
// `push_phase`/`pop_phase` acquire and release one of those slots; nothing
// stops a future caller from pushing a second, differently-sized phase
// (e.g. a separate cap for link jobs vs. compile jobs) on top of the same
// primitive.
//
// Every worker here is a scoped thread running the exact same
// `engine::execute_sync` a single-threaded caller would use directly, so
// there is exactly one recipe-execution code path regardless of `-j`.
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::context::Context;
use crate::diagnostics::{Diagnostics, Failed};
use crate::rule::Action;
use crate::target::{ExecuteEnv, Target, TargetState};

/// A counting semaphore with the vocabulary the design notes use:
/// `push_phase` blocks until a slot is free and takes it, `pop_phase`
/// returns it.
pub struct JobSlots {
    state: Mutex<usize>,
    cap: usize,
    cv: Condvar,
}

impl JobSlots {
    pub fn new(cap: usize) -> Self {
        JobSlots { state: Mutex::new(0), cap: cap.max(1), cv: Condvar::new() }
    }

    pub fn push_phase(&self) {
        let mut g = self.state.lock().unwrap();
        while *g >= self.cap {
            g = self.cv.wait(g).unwrap();
        }
        *g += 1;
    }

    pub fn pop_phase(&self) {
        let mut g = self.state.lock().unwrap();
        *g -= 1;
        self.cv.notify_one();
    }
}

pub struct SchedulerResult {
    pub succeeded: Vec<Arc<Target>>,
    pub failed: Vec<(Arc<Target>, Failed)>,
    /// A failure from the post-hoc pass (§4.5), which runs after the main
    /// graph and isn't tied to one of the caller's top-level targets.
    pub post_hoc_failure: Option<Failed>,
}

impl SchedulerResult {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.post_hoc_failure.is_none()
    }
}

/// Runs `action` over every target in `targets`, each on its own scoped
/// thread, throttled to `jobs` concurrent executions. With `keep_going`
/// false, once any target fails no further *unstarted* targets are
/// dispatched (already-running ones are left to finish, matching the "stop
/// after the current job" behavior the teacher's own builder used).
pub fn run(
    ctx: &Context,
    action: Action,
    targets: &[Arc<Target>],
    jobs: usize,
    env: ExecuteEnv,
    keep_going: bool,
    diag: &Diagnostics,
) -> SchedulerResult {
    let slots = JobSlots::new(jobs);
    let cancelled = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<(Arc<Target>, Result<TargetState, Failed>)>();

    thread::scope(|scope| {
        for target in targets {
            let tx = tx.clone();
            let slots = &slots;
            let cancelled = &cancelled;
            let target = target.clone();
            scope.spawn(move || {
                slots.push_phase();
                if !keep_going && cancelled.load(Ordering::SeqCst) {
                    slots.pop_phase();
                    return;
                }

                let buf = diag.buffer_for(target.name().to_string());
                let result = crate::engine::execute_sync(ctx, action, &target, &env);
                if let Err(e) = &result {
                    buf.push_line(format!("error: {e}"));
                }
                buf.flush();

                if result.is_err() && !keep_going {
                    cancelled.store(true, Ordering::SeqCst);
                }
                let _ = tx.send((target, result));
                slots.pop_phase();
            });
        }
        drop(tx);

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (target, result) in rx {
            match result {
                Ok(_) => succeeded.push(target),
                Err(e) => failed.push((target, e)),
            }
        }

        // §4.5: post-hoc prerequisites registered by any rule's `apply` run
        // in a second pass after the main graph, on this same thread (the
        // teacher's pattern of a cheap tail pass rather than a dedicated
        // worker, since post-hoc targets are expected to be rare).
        let post_hoc_failure = if failed.is_empty() || keep_going {
            crate::engine::run_post_hoc_pass(ctx, action, &env).err()
        } else {
            None
        };

        SchedulerResult { succeeded, failed, post_hoc_failure }
    })
}
