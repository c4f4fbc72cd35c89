// ============================================================================
// dyndep.rs — dynamic prerequisite injection
// ============================================================================
//
// A rule's `apply` doesn't always know its full prerequisite list from the
// buildfile alone — a C compile rule only learns which headers a source
// transitively includes by actually preprocessing it (or by reading a
// previous run's depdb). These helpers are what such a rule calls, from
// inside `apply`, to fold a discovered target into the graph:
//
//   inject_file              — target may or may not already exist; create
//                               it (as a prerequisite-only declaration) if
//                               not, matching it so it can be executed.
//   inject_existing_file      — target must already exist in the set, used
//                               when "discovering" something another rule
//                               already declared (e.g. a generated header
//                               the source's own target group produces).
//   inject_group_member       — link a member into a target group.
//   inject_adhoc_group_member — same, for a group's ad hoc members (§4.6).
//   update_during_match        — the one documented exception to normal
//                               phase discipline: force a prerequisite's
//                               recipe to run immediately, during match,
//                               because its *content* (not just its
//                               mtime) is needed to continue matching (a
//                               generated header must exist before we can
//                               scan its own includes).
// ============================================================================

use std::sync::Arc;

use crate::context::{Context, RunPhase};
use crate::diagnostics::Failed;
use crate::engine;
use crate::rule::Action;
use crate::target::{DeclLevel, ExecuteEnv, Target, TargetKey, TargetState};

pub fn inject_file(ctx: &Context, action: Action, key: TargetKey) -> Result<Arc<Target>, Failed> {
    let target = ctx
        .targets
        .insert(key, DeclLevel::PrerequisiteOnly)
        .map_err(|e| Failed::graph(e.to_string()))?;
    engine::match_sync_locked(ctx, action, &target)?;
    Ok(target)
}

pub fn inject_existing_file(ctx: &Context, key: &TargetKey) -> Option<Arc<Target>> {
    ctx.targets.find(key)
}

pub fn inject_group_member(parent: &Arc<Target>, member: Arc<Target>) -> Result<(), Failed> {
    member.set_group(parent.clone())
}

pub fn inject_adhoc_group_member(parent: &Arc<Target>, member: Arc<Target>) {
    parent.push_adhoc_member(member);
}

/// Forces `target`'s recipe to run right now, during the caller's match
/// phase, and returns its resulting state. Brackets the phase switch with
/// `yield_phase`/`resume_phase` so the calling thread gives up its match
/// slot for the duration (letting a genuinely exclusive load phase start
/// elsewhere) and gets it back before returning.
pub fn update_during_match(ctx: &Context, action: Action, target: &Arc<Target>, env: &ExecuteEnv) -> Result<TargetState, Failed> {
    engine::match_sync_locked(ctx, action, target)?;

    ctx.phase.yield_phase();
    let result = (|| {
        ctx.phase.resume_phase(RunPhase::Execute);
        let r = engine::execute_sync_locked(ctx, action, target, env);
        // drop this thread's Execute hold before resuming Match.
        ctx.phase.yield_phase();
        r
    })();
    ctx.phase.resume_phase(RunPhase::Match);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;
    use crate::target::PrerequisiteTarget;

    struct TouchRule;
    impl Rule for TouchRule {
        fn name(&self) -> &str {
            "touch"
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
            let recipe: crate::target::Recipe = Arc::new(|_t: &Arc<Target>, _e: &ExecuteEnv| Ok(TargetState::Changed));
            Ok((recipe, Vec::new()))
        }
    }

    #[test]
    fn inject_file_creates_and_matches() {
        let ctx = Context::new_for_test();
        ctx.rules.register(Action::perform_update(), "file", Arc::new(TouchRule));
        let _match_guard = ctx.phase.lock(RunPhase::Match);
        let t = inject_file(&ctx, Action::perform_update(), TargetKey::new("file", "/out", "generated.h")).unwrap();
        assert_eq!(t.name(), "generated.h");
        assert_eq!(t.decl_level(), DeclLevel::PrerequisiteOnly);
    }

    #[test]
    fn inject_existing_file_finds_prior_insert() {
        let ctx = Context::new_for_test();
        let key = TargetKey::new("file", "/out", "shared.h");
        ctx.targets.insert(key.clone(), DeclLevel::Real).unwrap();
        assert!(inject_existing_file(&ctx, &key).is_some());
        assert!(inject_existing_file(&ctx, &TargetKey::new("file", "/out", "missing.h")).is_none());
    }

    #[test]
    fn update_during_match_runs_recipe_and_restores_match_phase() {
        let ctx = Context::new_for_test();
        ctx.rules.register(Action::perform_update(), "file", Arc::new(TouchRule));
        let t = ctx.targets.insert(TargetKey::new("file", "/out", "gen.h"), DeclLevel::Real).unwrap();

        let _match_guard = ctx.phase.lock(RunPhase::Match);
        let env = ExecuteEnv { dry_run: false };
        let state = update_during_match(&ctx, Action::perform_update(), &t, &env).unwrap();
        assert_eq!(state, TargetState::Changed);
        assert_eq!(ctx.phase.current(), RunPhase::Match);
    }
}
