// ============================================================================
// rule.rs — actions, the rule trait, and per-scope rule registration
// ============================================================================
//
// An `Action` pairs a meta-operation (perform, configure, ...) with an
// operation (update, clean, ...); `target.rs`'s opstate is keyed on the raw
// `(u16, u16)` pair so that module doesn't need to know about rules at all.
// `Rule` is the one trait third-party code implements to teach the engine
// about a new target/recipe combination — `match_rule` decides applicability,
// `apply` does the (possibly dynamic, dyndep-injecting) work of resolving
// prerequisites into a `Recipe`.
// ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::context::Context;
use crate::diagnostics::Failed;
use crate::target::{PrerequisiteTarget, Recipe, Target};

pub const META_PERFORM: u16 = 0;
pub const META_CONFIGURE: u16 = 1;

pub const OP_UPDATE: u16 = 0;
pub const OP_CLEAN: u16 = 1;

/// Whether an operation executes a target's prerequisites before its own
/// recipe (the common case, e.g. update) or after (e.g. clean, which must
/// remove a target's own output before recursing into the things it no
/// longer needs once it's gone). See §4.5 "Execution modes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    pub meta_operation: u16,
    pub operation: u16,
}

impl Action {
    pub const fn new(meta_operation: u16, operation: u16) -> Self {
        Action { meta_operation, operation }
    }

    pub fn perform_update() -> Self {
        Action::new(META_PERFORM, OP_UPDATE)
    }

    pub fn perform_clean() -> Self {
        Action::new(META_PERFORM, OP_CLEAN)
    }

    pub(crate) fn key(self) -> (u16, u16) {
        (self.meta_operation, self.operation)
    }
}

pub trait Rule: Send + Sync {
    /// A short, stable identifier used in diagnostics and as the opstate's
    /// recorded rule name.
    fn name(&self) -> &str;

    /// Whether this rule is willing to build `target` for `action`.
    fn match_rule(&self, action: Action, target: &Arc<Target>, ctx: &Context) -> bool;

    /// Resolves this target's prerequisites into matched `Arc<Target>`s
    /// (recursively calling `engine::match_sync` on each), optionally
    /// injecting further dynamic prerequisites discovered along the way
    /// (`dyndep.rs`), and returns the recipe that will later execute
    /// alongside the prerequisite list `execute_sync` must build first.
    fn apply(
        &self,
        action: Action,
        target: &Arc<Target>,
        ctx: &Context,
    ) -> Result<(Recipe, Vec<PrerequisiteTarget>), Failed>;
}

/// Rules registered for one target type, most-recently-registered first
/// (so a project can override a base rule by registering a more specific
/// one later).
#[derive(Default)]
struct TypeRules {
    rules: Vec<Arc<dyn Rule>>,
}

/// A process-wide table of rules, keyed by `(Action, target type name)`.
/// Real build systems scope rule registration per-scope; this simplified
/// model registers globally, which is sufficient for the single-project
/// demo front-end and is where a multi-project host would add a scope
/// parameter.
#[derive(Default)]
pub struct RuleSet {
    by_action_type: RwLock<HashMap<(u16, u16, String), TypeRules>>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet { by_action_type: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, action: Action, target_type: impl Into<String>, rule: Arc<dyn Rule>) {
        let key = (action.meta_operation, action.operation, target_type.into());
        self.by_action_type.write().unwrap().entry(key).or_default().rules.push(rule);
    }

    /// Finds a matching rule for `target` under `action`, trying the
    /// target's own type and then its base types, most specific first, and
    /// within a type trying most-recently-registered first.
    pub fn find(
        &self,
        action: Action,
        target: &Arc<Target>,
        ctx: &Context,
    ) -> Option<Arc<dyn Rule>> {
        let chain = ctx.target_types.chain(target.type_name());
        let table = self.by_action_type.read().unwrap();
        for type_name in chain {
            let key = (action.meta_operation, action.operation, type_name.to_string());
            if let Some(type_rules) = table.get(&key) {
                for rule in type_rules.rules.iter().rev() {
                    if rule.match_rule(action, target, ctx) {
                        return Some(rule.clone());
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{ExecuteEnv, TargetKey, TargetState};

    struct AlwaysMatch;
    impl Rule for AlwaysMatch {
        fn name(&self) -> &str {
            "always"
        }
        fn match_rule(&self, _action: Action, _target: &Arc<Target>, _ctx: &Context) -> bool {
            true
        }
        fn apply(
            &self,
            _action: Action,
            _target: &Arc<Target>,
            _ctx: &Context,
        ) -> Result<(Recipe, Vec<PrerequisiteTarget>), Failed> {
            let recipe: Recipe = Arc::new(|_t: &Arc<Target>, _e: &ExecuteEnv| Ok(TargetState::Unchanged));
            Ok((recipe, Vec::new()))
        }
    }

    #[test]
    fn find_falls_back_to_base_type() {
        let ctx = Context::new_for_test();
        let rules = RuleSet::new();
        rules.register(Action::perform_update(), "file", Arc::new(AlwaysMatch));
        let t = ctx.targets.insert(TargetKey::new("exe", "/out", "app"), crate::target::DeclLevel::Real).unwrap();
        assert!(rules.find(Action::perform_update(), &t, &ctx).is_some());
    }

    #[test]
    fn no_match_without_registration() {
        let ctx = Context::new_for_test();
        let rules = RuleSet::new();
        let t = ctx.targets.insert(TargetKey::new("exe", "/out", "app"), crate::target::DeclLevel::Real).unwrap();
        assert!(rules.find(Action::perform_update(), &t, &ctx).is_none());
    }
}
