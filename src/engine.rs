// ============================================================================
// engine.rs — match and execute
// ============================================================================
//
// `match_sync` drives a target through touched -> tried -> matched ->
// applied: it finds a rule, and the rule's `apply` recursively matches
// whatever prerequisites it needs. `execute_sync` then walks the resulting
// prerequisite list depth-first, executing children before invoking the
// target's own recipe, same order the scheduler's parallel version must
// preserve (§5: "a target's recipe never runs before its prerequisites'
// recipes have finished").
//
// Both are "sync" in the sense that they block the calling thread rather
// than fanning out to the scheduler's thread pool; `scheduler.rs` builds
// the parallel, phase-aware driver on top of these as the single-threaded
// reference semantics.
// ============================================================================

use std::sync::Arc;

use crate::context::{Context, RunPhase};
use crate::diagnostics::Failed;
use crate::rule::{Action, OperationMode};
use crate::target::{ExecuteEnv, Target, TargetState};

/// Matches `target` for `action`, blocking until some other thread's
/// in-flight match completes if one is already underway. Idempotent.
pub fn match_sync(ctx: &Context, action: Action, target: &Arc<Target>) -> Result<(), Failed> {
    let _phase = ctx.phase.lock(RunPhase::Match);
    match_sync_locked(ctx, action, target)
}

pub(crate) fn match_sync_locked(ctx: &Context, action: Action, target: &Arc<Target>) -> Result<(), Failed> {
    let op = target.opstate(action.key());
    if op.try_begin_match() {
        let result = (|| {
            let rule = ctx.rules.find(action, target, ctx).ok_or_else(|| {
                Failed::rule(format!(
                    "no rule to {}/{} target '{}'",
                    action.meta_operation,
                    action.operation,
                    target.name()
                ))
            })?;
            let (recipe, prereq_targets) = rule.apply(action, target, ctx)?;
            Ok::<_, Failed>((rule.name().to_string(), recipe, prereq_targets))
        })();
        match result {
            Ok((rule_name, recipe, prereq_targets)) => {
                op.finish_match(rule_name, recipe, prereq_targets);
            }
            Err(e) => {
                // Leave the target un-matched so a caller checking state sees
                // it never got past `Tried`; unblock anyone spin-waiting.
                op.finish_match("<failed>".into(), Arc::new(|_: &Arc<Target>, _: &ExecuteEnv| Ok(TargetState::Unchanged)), Vec::new());
                return Err(e);
            }
        }
    } else {
        op.wait_applied();
    }
    Ok(())
}

/// Executes `target` for `action`: matches it if not already, executes its
/// matched prerequisites first (depth-first, so a diamond-shaped graph runs
/// each shared prerequisite exactly once), then runs its own recipe.
pub fn execute_sync(ctx: &Context, action: Action, target: &Arc<Target>, env: &ExecuteEnv) -> Result<TargetState, Failed> {
    // `match_sync` matches the whole reachable subtree (each rule's `apply`
    // recursively matches its own prerequisites), so once it returns here
    // the recursive walk below never needs to touch the match phase again
    // and can hold a single `Execute` guard for the whole subtree.
    match_sync(ctx, action, target)?;
    let _phase = ctx.phase.lock(RunPhase::Execute);
    execute_sync_locked(ctx, action, target, env)
}

pub(crate) fn execute_sync_locked(ctx: &Context, action: Action, target: &Arc<Target>, env: &ExecuteEnv) -> Result<TargetState, Failed> {
    let op = target.opstate(action.key());
    let (_, recipe, prereq_targets) = op.wait_applied();

    if op.try_begin_execute() {
        // §4.5: `First` runs prerequisites before this target's own recipe
        // (the common case); `Last` runs the recipe first (clean must
        // remove a target's own output before recursing into things it no
        // longer needs once it's gone).
        let state = match ctx.operation_mode(action.operation) {
            OperationMode::First => {
                for p in &prereq_targets {
                    execute_sync_locked(ctx, action, &p.target, env)?;
                }
                recipe.run(target, env)?
            }
            OperationMode::Last => {
                let state = recipe.run(target, env)?;
                for p in &prereq_targets {
                    execute_sync_locked(ctx, action, &p.target, env)?;
                }
                state
            }
        };
        op.finish_execute();
        Ok(state)
    } else {
        op.wait_executed();
        Ok(TargetState::Unchanged)
    }
}

/// §4.5's second pass: drains whatever rules registered via
/// `Context::register_post_hoc` while the main graph was being
/// match/executed, and match/executes each of them too. Iterated to a
/// fixed point, since a post-hoc target's own `apply` is allowed to
/// register further post-hoc targets (e.g. a generated test driver
/// discovering it also needs a generated fixture file).
pub fn run_post_hoc_pass(ctx: &Context, action: Action, env: &ExecuteEnv) -> Result<(), Failed> {
    loop {
        let batch = ctx.drain_post_hoc();
        if batch.is_empty() {
            return Ok(());
        }
        for target in &batch {
            execute_sync(ctx, action, target, env)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DeclLevel, PrerequisiteTarget, TargetKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingRule {
        runs: Arc<AtomicUsize>,
    }

    impl crate::rule::Rule for CountingRule {
        fn name(&self) -> &str {
            "counting"
        }
        fn match_rule(&self, _action: Action, _target: &Arc<Target>, _ctx: &Context) -> bool {
            true
        }
        fn apply(
            &self,
            _action: Action,
            _target: &Arc<Target>,
            _ctx: &Context,
        ) -> Result<(crate::target::Recipe, Vec<PrerequisiteTarget>), Failed> {
            let runs = self.runs.clone();
            let recipe: crate::target::Recipe = Arc::new(move |_t: &Arc<Target>, _e: &ExecuteEnv| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(TargetState::Changed)
            });
            Ok((recipe, Vec::new()))
        }
    }

    #[test]
    fn execute_runs_recipe_exactly_once() {
        let ctx = Context::new_for_test();
        let runs = Arc::new(AtomicUsize::new(0));
        ctx.rules.register(Action::perform_update(), "file", Arc::new(CountingRule { runs: runs.clone() }));
        let t = ctx.targets.insert(TargetKey::new("file", "/out", "a"), DeclLevel::Real).unwrap();

        let env = ExecuteEnv { dry_run: false };
        execute_sync(&ctx, Action::perform_update(), &t, &env).unwrap();
        execute_sync(&ctx, Action::perform_update(), &t, &env).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_rule_is_an_error() {
        let ctx = Context::new_for_test();
        let t = ctx.targets.insert(TargetKey::new("file", "/out", "a"), DeclLevel::Real).unwrap();
        let env = ExecuteEnv { dry_run: false };
        assert!(execute_sync(&ctx, Action::perform_update(), &t, &env).is_err());
    }

    #[test]
    fn diamond_dependency_executes_shared_prerequisite_once() {
        let ctx = Context::new_for_test();
        let runs = Arc::new(AtomicUsize::new(0));
        ctx.rules.register(Action::perform_update(), "file", Arc::new(CountingRule { runs: runs.clone() }));

        let shared = ctx.targets.insert(TargetKey::new("file", "/out", "shared"), DeclLevel::Real).unwrap();

        struct ParentRule(Arc<Target>);
        impl crate::rule::Rule for ParentRule {
            fn name(&self) -> &str {
                "parent"
            }
            fn match_rule(&self, _action: Action, target: &Arc<Target>, _ctx: &Context) -> bool {
                target.name() != "shared"
            }
            fn apply(
                &self,
                action: Action,
                _target: &Arc<Target>,
                ctx: &Context,
            ) -> Result<(crate::target::Recipe, Vec<PrerequisiteTarget>), Failed> {
                match_sync_locked(ctx, action, &self.0)?;
                let recipe: crate::target::Recipe = Arc::new(|_t: &Arc<Target>, _e: &ExecuteEnv| Ok(TargetState::Unchanged));
                Ok((
                    recipe,
                    vec![PrerequisiteTarget {
                        target: self.0.clone(),
                        adhoc: false,
                        include: crate::target::IncludeMode::True,
                    }],
                ))
            }
        }

        ctx.rules.register(Action::perform_update(), "exe", Arc::new(ParentRule(shared.clone())));
        let a = ctx.targets.insert(TargetKey::new("exe", "/out", "a"), DeclLevel::Real).unwrap();
        let b = ctx.targets.insert(TargetKey::new("exe", "/out", "b"), DeclLevel::Real).unwrap();

        let env = ExecuteEnv { dry_run: false };
        execute_sync(&ctx, Action::perform_update(), &a, &env).unwrap();
        execute_sync(&ctx, Action::perform_update(), &b, &env).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_hoc_pass_executes_a_target_registered_during_apply() {
        let ctx = Context::new_for_test();
        let runs = Arc::new(AtomicUsize::new(0));

        let extra = ctx.targets.insert(TargetKey::new("file", "/out", "extra"), DeclLevel::Implied).unwrap();
        ctx.rules.register(Action::perform_update(), "file", Arc::new(CountingRule { runs: runs.clone() }));

        struct RegisteringRule {
            extra: Arc<Target>,
        }
        impl crate::rule::Rule for RegisteringRule {
            fn name(&self) -> &str {
                "registering"
            }
            fn match_rule(&self, _action: Action, target: &Arc<Target>, _ctx: &Context) -> bool {
                target.name() == "app"
            }
            fn apply(
                &self,
                _action: Action,
                _target: &Arc<Target>,
                ctx: &Context,
            ) -> Result<(crate::target::Recipe, Vec<PrerequisiteTarget>), Failed> {
                ctx.register_post_hoc(self.extra.clone());
                let recipe: crate::target::Recipe = Arc::new(|_t: &Arc<Target>, _e: &ExecuteEnv| Ok(TargetState::Unchanged));
                Ok((recipe, Vec::new()))
            }
        }
        ctx.rules.register(Action::perform_update(), "exe", Arc::new(RegisteringRule { extra: extra.clone() }));
        let app = ctx.targets.insert(TargetKey::new("exe", "/out", "app"), DeclLevel::Real).unwrap();

        let env = ExecuteEnv { dry_run: false };
        execute_sync(&ctx, Action::perform_update(), &app, &env).unwrap();
        // Not executed yet: it was only registered, not reached by the main graph.
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        run_post_hoc_pass(&ctx, Action::perform_update(), &env).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Idempotent: a second pass with nothing newly registered is a no-op.
        run_post_hoc_pass(&ctx, Action::perform_update(), &env).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clean_mode_runs_recipe_before_prerequisites() {
        let ctx = Context::new_for_test();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        struct OrderRule {
            label: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
            prereq: Option<Arc<Target>>,
        }
        impl crate::rule::Rule for OrderRule {
            fn name(&self) -> &str {
                self.label
            }
            fn match_rule(&self, _action: Action, _target: &Arc<Target>, _ctx: &Context) -> bool {
                true
            }
            fn apply(
                &self,
                _action: Action,
                _target: &Arc<Target>,
                _ctx: &Context,
            ) -> Result<(crate::target::Recipe, Vec<PrerequisiteTarget>), Failed> {
                let order = self.order.clone();
                let label = self.label;
                let recipe: crate::target::Recipe = Arc::new(move |_t: &Arc<Target>, _e: &ExecuteEnv| {
                    order.lock().unwrap().push(label);
                    Ok(TargetState::Changed)
                });
                let prereqs = match &self.prereq {
                    Some(p) => vec![PrerequisiteTarget { target: p.clone(), adhoc: false, include: crate::target::IncludeMode::True }],
                    None => Vec::new(),
                };
                Ok((recipe, prereqs))
            }
        }

        let leaf = ctx.targets.insert(TargetKey::new("file", "/out", "leaf"), DeclLevel::Real).unwrap();
        ctx.rules.register(
            Action::perform_clean(),
            "file",
            Arc::new(OrderRule { label: "leaf", order: order.clone(), prereq: None }),
        );
        ctx.rules.register(
            Action::perform_clean(),
            "exe",
            Arc::new(OrderRule { label: "exe", order: order.clone(), prereq: Some(leaf) }),
        );
        let exe = ctx.targets.insert(TargetKey::new("exe", "/out", "app"), DeclLevel::Real).unwrap();

        let env = ExecuteEnv { dry_run: false };
        execute_sync(&ctx, Action::perform_clean(), &exe, &env).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["exe", "leaf"]);
    }
}
