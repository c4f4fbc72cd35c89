// ============================================================================
// scope.rs — the out/src scope trees and variable lookup
// ============================================================================
//
// Every directory that participates in a build gets an "out" scope; scopes
// form a tree mirroring the out-tree directory hierarchy, found by walking
// up from a directory to its nearest registered ancestor (the same prefix-
// map trick `dag.rs`'s topological walk uses for directories, generalized
// to arbitrary depth). A separate, much smaller map associates source
// directories with the out scope that builds them, since in an out-of-tree
// build the two trees don't share a shape.
//
// Variable lookup walks from the most specific scope up through parents to
// the global scope, honoring each variable's declared visibility: a
// `Scope`-visibility variable found three levels up from where you're
// standing might as well not exist, so the walk skips it and keeps going
// rather than stopping there.
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::value::Value;
use crate::variable::{PoolMode, VariablePool, Visibility};

pub struct Scope {
    pub out_dir: PathBuf,
    pub src_dir: Mutex<Option<PathBuf>>,
    pub root: bool,
    parent: Option<Arc<Scope>>,
    pub vars: Mutex<VariablePool>,
    /// Variable values narrowed to a specific target type/name pattern
    /// within this scope (e.g. `file{*}: install = true`), keyed by a
    /// caller-chosen pattern id.
    pub target_type_vars: Mutex<HashMap<String, VariablePool>>,
    pub subprojects: Mutex<HashMap<String, PathBuf>>,
}

impl Scope {
    pub fn depth(&self) -> usize {
        match &self.parent {
            Some(p) => p.depth() + 1,
            None => 0,
        }
    }

    pub fn parent(&self) -> Option<Arc<Scope>> {
        self.parent.clone()
    }

    pub fn root_scope(self: &Arc<Self>) -> Arc<Scope> {
        let mut cur = self.clone();
        loop {
            if cur.root || cur.parent.is_none() {
                return cur;
            }
            cur = cur.parent.clone().unwrap();
        }
    }

    /// Walks this scope and its ancestors, honoring `Visibility`: a value
    /// found at a scope whose distance from `self` exceeds what the
    /// variable's own declared visibility allows is skipped rather than
    /// returned, and the walk continues upward.
    pub fn lookup_original(self: &Arc<Self>, var_name: &str) -> Option<(Value, Arc<Scope>)> {
        let mut cur = Some(self.clone());
        let mut distance = 0usize;
        let mut crossed_root = false;
        while let Some(s) = cur {
            let pool = s.vars.lock().unwrap();
            if let Some(var) = pool.get_variable(var_name) {
                let visible = match var.visibility {
                    Visibility::Global => true,
                    Visibility::Project => !crossed_root,
                    Visibility::Scope => distance == 0,
                    Visibility::Target | Visibility::Prerequisite => false,
                };
                if visible {
                    if let Some(v) = pool.original(var_name) {
                        let v = v.clone();
                        return Some((v, s.clone()));
                    }
                }
            }
            drop(pool);
            // A project boundary is crossed once we've examined the root
            // scope itself and are about to step past it into its parent.
            if s.root {
                crossed_root = true;
            }
            distance += 1;
            cur = s.parent.clone();
        }
        None
    }

    pub fn add_subproject(&self, name: impl Into<String>, out_dir: PathBuf) {
        self.subprojects.lock().unwrap().insert(name.into(), out_dir);
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("out_dir", &self.out_dir).field("root", &self.root).finish()
    }
}

// ---------------------------------------------------------------------------
// Scope map
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScopeMap {
    out: RwLock<HashMap<PathBuf, Arc<Scope>>>,
    src_to_out: RwLock<HashMap<PathBuf, PathBuf>>,
}

impl ScopeMap {
    pub fn new() -> Self {
        ScopeMap { out: RwLock::new(HashMap::new()), src_to_out: RwLock::new(HashMap::new()) }
    }

    fn nearest_ancestor(map: &HashMap<PathBuf, Arc<Scope>>, dir: &Path) -> Option<Arc<Scope>> {
        let mut cur = Some(dir);
        while let Some(d) = cur {
            if let Some(s) = map.get(d) {
                return Some(s.clone());
            }
            cur = d.parent();
        }
        None
    }

    /// Inserts (idempotently) an out-tree scope rooted at `dir`.
    pub fn insert_out(&self, dir: PathBuf, root: bool) -> Arc<Scope> {
        if let Some(existing) = self.out.read().unwrap().get(&dir) {
            return existing.clone();
        }
        let mut w = self.out.write().unwrap();
        if let Some(existing) = w.get(&dir) {
            return existing.clone();
        }
        let parent = dir.parent().and_then(|p| Self::nearest_ancestor(&w, p));
        let scope = Arc::new(Scope {
            out_dir: dir.clone(),
            src_dir: Mutex::new(None),
            root,
            parent,
            vars: Mutex::new(VariablePool::new(PoolMode::Writable)),
            target_type_vars: Mutex::new(HashMap::new()),
            subprojects: Mutex::new(HashMap::new()),
        });
        w.insert(dir, scope.clone());
        scope
    }

    /// Associates a source directory with the out scope that builds it.
    pub fn insert_src(&self, src: PathBuf, out: PathBuf) {
        if let Some(scope) = self.out.read().unwrap().get(&out) {
            *scope.src_dir.lock().unwrap() = Some(src.clone());
        }
        self.src_to_out.write().unwrap().insert(src, out);
    }

    /// Finds the innermost out scope that encloses `dir` (not necessarily
    /// registered exactly at `dir`).
    pub fn find_out(&self, dir: &Path) -> Option<Arc<Scope>> {
        let r = self.out.read().unwrap();
        Self::nearest_ancestor(&r, dir)
    }

    /// Finds the out scope associated with a source directory, walking up
    /// the src tree the same way `find_out` walks the out tree.
    pub fn find_src(&self, dir: &Path) -> Option<Arc<Scope>> {
        let m = self.src_to_out.read().unwrap();
        let mut cur = Some(dir);
        while let Some(d) = cur {
            if let Some(out) = m.get(d) {
                return self.find_out(out);
            }
            cur = d.parent();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.out.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
