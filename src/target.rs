// ============================================================================
// target.rs — target keys, the target type lattice, and the target set
// ============================================================================
//
// Targets are identified by a five-part key (type, out dir, src dir, name,
// extension) and stored in a single process-wide, deduplicated `TargetSet`.
// Once inserted a target is never removed or moved — every `Arc<Target>`
// handed out stays valid for the context's lifetime, which is why the set
// hands out `Arc<Target>` rather than references tied to a lock guard.
//
// The per-action "opstate" (§3 invariant 5) drives the touched → tried →
// matched → applied → executed state machine that `engine.rs` advances.
// Here it's modeled with a pair of atomic "building" flags rather than a
// single overloaded counter: the flag is the CAS point a racing caller uses
// to become the builder, and the stable state is only ever written once the
// builder is done, under the opstate's own mutex.
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::diagnostics::Failed;
use crate::variable::{PoolMode, VariablePool};

// ---------------------------------------------------------------------------
// Target type lattice
// ---------------------------------------------------------------------------

/// A registered target type: a name, an optional base (single inheritance),
/// and the handful of type-specific behaviors the engine needs. Modeled as
/// data rather than a factory/vtable struct of function pointers, since
/// Rust's closures already give us that without an extra indirection layer.
#[derive(Clone)]
pub struct TargetTypeDef {
    pub name: String,
    pub base: Option<String>,
    pub fixed_extension: Option<String>,
    pub default_extension: Option<String>,
}

#[derive(Default)]
pub struct TargetTypeTable {
    defs: HashMap<String, TargetTypeDef>,
}

impl TargetTypeTable {
    pub fn new() -> Self {
        let mut t = TargetTypeTable { defs: HashMap::new() };
        t.register(TargetTypeDef { name: "target".into(), base: None, fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "mtime_target".into(), base: Some("target".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "path_target".into(), base: Some("mtime_target".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "file".into(), base: Some("path_target".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "exe".into(), base: Some("file".into()), fixed_extension: Some(String::new()), default_extension: None });
        t.register(TargetTypeDef { name: "alias".into(), base: Some("target".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "dir".into(), base: Some("alias".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "fsdir".into(), base: Some("mtime_target".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "buildfile".into(), base: Some("file".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "doc".into(), base: Some("file".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "man".into(), base: Some("doc".into()), fixed_extension: None, default_extension: None });
        t.register(TargetTypeDef { name: "group".into(), base: Some("target".into()), fixed_extension: None, default_extension: None });
        t
    }

    pub fn register(&mut self, def: TargetTypeDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&TargetTypeDef> {
        self.defs.get(name)
    }

    /// Walks the base chain from `name` to the root, inclusive, most
    /// specific first.
    pub fn chain<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        let mut cur = Some(name);
        while let Some(n) = cur {
            out.push(n);
            cur = self.defs.get(n).and_then(|d| d.base.as_deref());
        }
        out
    }

    pub fn is_a(&self, name: &str, base: &str) -> bool {
        self.chain(name).contains(&base)
    }

    pub fn default_extension(&self, name: &str) -> Option<String> {
        for t in self.chain(name) {
            if let Some(d) = self.defs.get(t) {
                if d.default_extension.is_some() {
                    return d.default_extension.clone();
                }
            }
        }
        None
    }

    pub fn fixed_extension(&self, name: &str) -> Option<String> {
        for t in self.chain(name) {
            if let Some(d) = self.defs.get(t) {
                if d.fixed_extension.is_some() {
                    return d.fixed_extension.clone();
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Target key
// ---------------------------------------------------------------------------

/// Tri-state extension, matching the three things a buildfile can say about
/// a target's extension (§6): genuinely absent, explicitly none, or a
/// concrete string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Extension {
    Unspecified,
    None,
    Some(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub type_name: String,
    pub out_dir: PathBuf,
    pub src_dir: PathBuf,
    pub name: String,
    pub ext: Extension,
}

impl TargetKey {
    pub fn new(type_name: impl Into<String>, out_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        TargetKey {
            type_name: type_name.into(),
            out_dir: out_dir.into(),
            src_dir: PathBuf::new(),
            name: name.into(),
            ext: Extension::Unspecified,
        }
    }

    pub fn with_ext(mut self, ext: Extension) -> Self {
        self.ext = ext;
        self
    }

    pub fn with_src_dir(mut self, src_dir: impl Into<PathBuf>) -> Self {
        self.src_dir = src_dir.into();
        self
    }

    fn bucket(&self) -> BucketKey {
        BucketKey {
            type_name: self.type_name.clone(),
            out_dir: self.out_dir.clone(),
            src_dir: self.src_dir.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    type_name: String,
    out_dir: PathBuf,
    src_dir: PathBuf,
    name: String,
}

// ---------------------------------------------------------------------------
// Declaration level (total order, upgrade-only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeclLevel {
    PrerequisiteOnly = 0,
    Implied = 1,
    Real = 2,
}

impl DeclLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DeclLevel::PrerequisiteOnly,
            1 => DeclLevel::Implied,
            _ => DeclLevel::Real,
        }
    }
}

// ---------------------------------------------------------------------------
// Prerequisites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeMode {
    False,
    True,
    Adhoc,
}

#[derive(Debug, Clone)]
pub struct Prerequisite {
    pub key: TargetKey,
    pub include: IncludeMode,
}

/// A resolved prerequisite-target graph edge, produced by `Rule::apply`
/// (engine.rs) and cached in the consumer's opstate.
#[derive(Clone)]
pub struct PrerequisiteTarget {
    pub target: Arc<Target>,
    pub adhoc: bool,
    pub include: IncludeMode,
}

// ---------------------------------------------------------------------------
// Recipes
// ---------------------------------------------------------------------------

/// Per-execution tuning a recipe needs without reaching back into the full
/// `Context` (kept here, rather than in context.rs, so this module doesn't
/// have to depend upward on it).
#[derive(Debug, Clone, Copy)]
pub struct ExecuteEnv {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// The recipe determined its output was already up to date.
    Unchanged,
    /// The recipe updated (or, in dry-run, would have updated) the target.
    Changed,
}

pub trait RecipeFn: Send + Sync {
    fn run(&self, target: &Arc<Target>, env: &ExecuteEnv) -> Result<TargetState, Failed>;
}

pub type Recipe = Arc<dyn RecipeFn>;

impl<F> RecipeFn for F
where
    F: Fn(&Arc<Target>, &ExecuteEnv) -> Result<TargetState, Failed> + Send + Sync,
{
    fn run(&self, target: &Arc<Target>, env: &ExecuteEnv) -> Result<TargetState, Failed> {
        self(target, env)
    }
}

// ---------------------------------------------------------------------------
// Opstate: the touched -> tried -> matched -> applied -> executed machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Touched,
    Tried,
    Matched,
    Applied,
    Executed,
}

struct OpStateInner {
    rule_name: Option<String>,
    recipe: Option<Recipe>,
    prereq_targets: Vec<PrerequisiteTarget>,
}

pub struct OpState {
    state: Mutex<(TaskState, OpStateInner)>,
    matching: AtomicBool,
    executing: AtomicBool,
    dependency_count: AtomicU64,
}

impl OpState {
    fn new() -> Self {
        OpState {
            state: Mutex::new((
                TaskState::Touched,
                OpStateInner { rule_name: None, recipe: None, prereq_targets: Vec::new() },
            )),
            matching: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            dependency_count: AtomicU64::new(0),
        }
    }

    pub fn task_state(&self) -> TaskState {
        self.state.lock().unwrap().0
    }

    /// CAS attempt to become the thread that matches/applies this target for
    /// this action. `false` means someone else already is or already did.
    pub fn try_begin_match(&self) -> bool {
        if self.task_state() >= TaskState::Matched {
            return false;
        }
        self.matching.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn finish_match(&self, rule_name: String, recipe: Recipe, prereq_targets: Vec<PrerequisiteTarget>) {
        {
            let mut g = self.state.lock().unwrap();
            g.1.rule_name = Some(rule_name);
            g.1.recipe = Some(recipe);
            g.1.prereq_targets = prereq_targets;
            g.0 = TaskState::Applied;
        }
        self.matching.store(false, Ordering::Release);
    }

    /// Spin-waits (yielding between polls, per the design notes) until this
    /// target reaches `Applied` for this action, then returns the rule name,
    /// recipe and resolved prerequisite targets.
    pub fn wait_applied(&self) -> (String, Recipe, Vec<PrerequisiteTarget>) {
        loop {
            {
                let g = self.state.lock().unwrap();
                if g.0 >= TaskState::Applied {
                    return (
                        g.1.rule_name.clone().expect("applied implies rule_name set"),
                        g.1.recipe.clone().expect("applied implies recipe set"),
                        g.1.prereq_targets.clone(),
                    );
                }
            }
            std::thread::yield_now();
        }
    }

    pub fn try_begin_execute(&self) -> bool {
        if self.task_state() >= TaskState::Executed {
            return false;
        }
        self.executing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn finish_execute(&self) {
        {
            let mut g = self.state.lock().unwrap();
            g.0 = TaskState::Executed;
        }
        self.executing.store(false, Ordering::Release);
    }

    pub fn wait_executed(&self) {
        loop {
            if self.task_state() >= TaskState::Executed {
                return;
            }
            std::thread::yield_now();
        }
    }

    pub fn dependency_count(&self) -> u64 {
        self.dependency_count.load(Ordering::Relaxed)
    }

    pub fn add_dependency_count(&self, n: u64) {
        self.dependency_count.fetch_add(n, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

pub struct Target {
    type_name: String,
    out_dir: PathBuf,
    src_dir: PathBuf,
    name: String,
    ext: Mutex<Extension>,
    decl: AtomicU8,
    pub vars: Mutex<VariablePool>,
    pub prerequisites: Mutex<Vec<Prerequisite>>,
    group: Mutex<Option<Arc<Target>>>,
    adhoc_members: Mutex<Vec<Arc<Target>>>,
    opstates: Mutex<HashMap<(u16, u16), Arc<OpState>>>,
}

impl Target {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> Extension {
        self.ext.lock().unwrap().clone()
    }

    pub fn key(&self) -> TargetKey {
        TargetKey {
            type_name: self.type_name.clone(),
            out_dir: self.out_dir.clone(),
            src_dir: self.src_dir.clone(),
            name: self.name.clone(),
            ext: self.extension(),
        }
    }

    pub fn decl_level(&self) -> DeclLevel {
        DeclLevel::from_u8(self.decl.load(Ordering::Acquire))
    }

    /// Upgrades the declaration level; downgrades are silently ignored
    /// (§4.3: "can only be upgraded").
    pub fn upgrade_decl_level(&self, new: DeclLevel) {
        let mut cur = self.decl.load(Ordering::Acquire);
        while (new as u8) > cur {
            match self.decl.compare_exchange_weak(cur, new as u8, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn group(&self) -> Option<Arc<Target>> {
        self.group.lock().unwrap().clone()
    }

    /// Links this target to a group. An attempt to re-link to a *different*
    /// group is a hard error (§4.6).
    pub fn set_group(&self, group: Arc<Target>) -> Result<(), Failed> {
        let mut g = self.group.lock().unwrap();
        match g.as_ref() {
            Some(existing) if !Arc::ptr_eq(existing, &group) => {
                Err(Failed::graph(format!(
                    "target '{}' already belongs to a different group",
                    self.name
                )))
            }
            _ => {
                *g = Some(group);
                Ok(())
            }
        }
    }

    pub fn adhoc_members(&self) -> Vec<Arc<Target>> {
        self.adhoc_members.lock().unwrap().clone()
    }

    pub fn push_adhoc_member(&self, member: Arc<Target>) {
        self.adhoc_members.lock().unwrap().push(member);
    }

    /// Returns (creating if necessary) the opstate for `action`.
    pub fn opstate(&self, action: (u16, u16)) -> Arc<OpState> {
        let mut map = self.opstates.lock().unwrap();
        map.entry(action).or_insert_with(|| Arc::new(OpState::new())).clone()
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("type", &self.type_name)
            .field("out_dir", &self.out_dir)
            .field("name", &self.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Target set: process-wide dedup store
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TargetSetError {
    #[error("target '{0}' declared with conflicting extensions '{1}' and '{2}'")]
    ExtensionMismatch(String, String, String),
    #[error("unknown target type '{0}'")]
    UnknownType(String),
}

pub struct TargetSet {
    entries: RwLock<HashMap<BucketKey, Arc<Target>>>,
}

impl Default for TargetSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSet {
    pub fn new() -> Self {
        TargetSet { entries: RwLock::new(HashMap::new()) }
    }

    pub fn find(&self, key: &TargetKey) -> Option<Arc<Target>> {
        self.entries.read().unwrap().get(&key.bucket()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Vec<Arc<Target>> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    /// Atomic find-or-create, with extension promotion/conflict handling per
    /// §4.3.
    pub fn insert(&self, key: TargetKey, decl: DeclLevel) -> Result<Arc<Target>, TargetSetError> {
        let bucket = key.bucket();

        if let Some(existing) = self.entries.read().unwrap().get(&bucket) {
            self.reconcile(existing, &key.ext, decl)?;
            return Ok(existing.clone());
        }

        let mut w = self.entries.write().unwrap();
        if let Some(existing) = w.get(&bucket) {
            self.reconcile(existing, &key.ext, decl)?;
            return Ok(existing.clone());
        }

        let target = Arc::new(Target {
            type_name: key.type_name.clone(),
            out_dir: key.out_dir.clone(),
            src_dir: key.src_dir.clone(),
            name: key.name.clone(),
            ext: Mutex::new(key.ext.clone()),
            decl: AtomicU8::new(decl as u8),
            vars: Mutex::new(VariablePool::new(PoolMode::Writable)),
            prerequisites: Mutex::new(Vec::new()),
            group: Mutex::new(None),
            adhoc_members: Mutex::new(Vec::new()),
            opstates: Mutex::new(HashMap::new()),
        });
        w.insert(bucket, target.clone());
        Ok(target)
    }

    fn reconcile(&self, existing: &Arc<Target>, new_ext: &Extension, decl: DeclLevel) -> Result<(), TargetSetError> {
        {
            let mut cur = existing.ext.lock().unwrap();
            match (&*cur, new_ext) {
                (Extension::Unspecified, _) => *cur = new_ext.clone(),
                (_, Extension::Unspecified) => {}
                (Extension::Some(a), Extension::Some(b)) if a != b => {
                    return Err(TargetSetError::ExtensionMismatch(existing.name.clone(), a.clone(), b.clone()))
                }
                _ => {}
            }
        }
        existing.upgrade_decl_level(decl);
        Ok(())
    }
}
