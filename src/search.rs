// ============================================================================
// search.rs — file search, the prefix map, and src/out path translation
// ============================================================================
//
// Three related lookups a rule needs when turning a relative path (from a
// buildfile, or from scanning a `#include`) into an actual target:
//
//   - src/out translation: given a scope, map a path in its src tree to the
//     corresponding path in its out tree and back, by swapping the common
//     prefix.
//   - the prefix map: several include search paths can all claim to own a
//     given relative path (e.g. both a project's own `include/` and a
//     dependency's installed headers); the prefix map remembers, per
//     relative subdirectory, which absolute root last claimed it, so the
//     same header always resolves to the same absolute file across a build.
//   - existing-file search: does a candidate file already exist in the src
//     tree, the out tree, or neither (meaning it is purely a to-be-generated
//     target)?
// ============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::scope::Scope;

/// Maps `scope`'s src path to the corresponding out path, or vice versa, by
/// swapping whichever of `src_dir`/`out_dir` is a prefix of `path`.
pub fn to_out(scope: &Scope, path: &Path) -> Option<PathBuf> {
    let src_dir = scope.src_dir.lock().unwrap().clone()?;
    let rel = path.strip_prefix(&src_dir).ok()?;
    Some(scope.out_dir.join(rel))
}

pub fn to_src(scope: &Scope, path: &Path) -> Option<PathBuf> {
    let src_dir = scope.src_dir.lock().unwrap().clone()?;
    let rel = path.strip_prefix(&scope.out_dir).ok()?;
    Some(src_dir.join(rel))
}

/// Whether `path` is out-of-tree for `scope` (neither under its src dir nor
/// its out dir) — relevant for deciding whether a discovered header belongs
/// to this project at all.
pub fn in_tree(scope: &Scope, path: &Path) -> bool {
    path.starts_with(&scope.out_dir) || scope.src_dir.lock().unwrap().as_ref().is_some_and(|s| path.starts_with(s))
}

// ---------------------------------------------------------------------------
// Prefix map
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PrefixMapError {
    #[error("relative path '{rel}' claimed by both '{first}' and '{second}'")]
    Ambiguous { rel: PathBuf, first: PathBuf, second: PathBuf },
}

/// Remembers, for each relative subdirectory, the absolute root that
/// resolved it. A second, *different* root claiming the same relative path
/// is an ambiguity error rather than a silent overwrite — two search paths
/// both providing `foo/bar.h` is almost always a misconfiguration the user
/// wants to hear about.
#[derive(Default)]
pub struct PrefixMap {
    entries: RwLock<HashMap<PathBuf, PathBuf>>,
}

impl PrefixMap {
    pub fn new() -> Self {
        PrefixMap { entries: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, rel: PathBuf, root: PathBuf) -> Result<(), PrefixMapError> {
        let mut w = self.entries.write().unwrap();
        match w.get(&rel) {
            Some(existing) if existing != &root => {
                Err(PrefixMapError::Ambiguous { rel, first: existing.clone(), second: root })
            }
            _ => {
                w.insert(rel, root);
                Ok(())
            }
        }
    }

    pub fn root_for(&self, rel: &Path) -> Option<PathBuf> {
        self.entries.read().unwrap().get(rel).cloned()
    }

    pub fn resolve(&self, rel: &Path) -> Option<PathBuf> {
        self.root_for(rel).map(|root| root.join(rel))
    }
}

// ---------------------------------------------------------------------------
// Existing-file search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundIn {
    Out,
    Src,
}

/// Checks whether `rel` (relative to `scope`) already exists as a real file
/// in the out tree or the src tree, preferring out (a generated file should
/// shadow a stale tracked-in-src copy of the same name).
pub fn find_existing(scope: &Scope, rel: &Path) -> Option<(PathBuf, FoundIn)> {
    let out_candidate = scope.out_dir.join(rel);
    if out_candidate.is_file() {
        return Some((out_candidate, FoundIn::Out));
    }
    if let Some(src_dir) = scope.src_dir.lock().unwrap().clone() {
        let src_candidate = src_dir.join(rel);
        if src_candidate.is_file() {
            return Some((src_candidate, FoundIn::Src));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeMap;

    #[test]
    fn src_out_translation_round_trips() {
        let map = ScopeMap::new();
        let scope = map.insert_out(PathBuf::from("/build/out"), true);
        map.insert_src(PathBuf::from("/src/proj"), PathBuf::from("/build/out"));

        let src_path = PathBuf::from("/src/proj/lib/a.c");
        let out_path = to_out(&scope, &src_path).unwrap();
        assert_eq!(out_path, PathBuf::from("/build/out/lib/a.c"));
        assert_eq!(to_src(&scope, &out_path).unwrap(), src_path);
    }

    #[test]
    fn prefix_map_rejects_conflicting_roots() {
        let pm = PrefixMap::new();
        pm.insert(PathBuf::from("foo/bar.h"), PathBuf::from("/a/include")).unwrap();
        pm.insert(PathBuf::from("foo/bar.h"), PathBuf::from("/a/include")).unwrap();
        let err = pm.insert(PathBuf::from("foo/bar.h"), PathBuf::from("/b/include")).unwrap_err();
        assert!(matches!(err, PrefixMapError::Ambiguous { .. }));
    }

    #[test]
    fn prefix_map_resolve_joins_root_and_rel() {
        let pm = PrefixMap::new();
        pm.insert(PathBuf::from("foo/bar.h"), PathBuf::from("/a/include")).unwrap();
        assert_eq!(pm.resolve(Path::new("foo/bar.h")), Some(PathBuf::from("/a/include/foo/bar.h")));
    }
}
