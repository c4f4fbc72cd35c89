// ============================================================================
// variable.rs — variables, variable pools, overrides, and variable patterns
// ============================================================================
//
// A `VariablePool` is the flat namespace backing one scope's (or the
// process-wide) variable map. Each entry pairs a `Variable` (its declared
// shape: type, visibility, overridability) with the `Value` currently
// assigned to it and the chain of CLI overrides registered against it.
//
// Visibility and overridability are fixed the first time a variable is
// entered into a pool (§3 "Once a variable is entered into the pool with a
// given type, the type is immutable"); re-inserting with a different type is
// a caller error, not something this module silently resolves.
// ============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::value::{Name, Value, ValueError, ValueTypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Scope,
    Target,
    Project,
    Global,
    Prerequisite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    /// `__override`: replaces the stem entirely.
    Replace,
    /// `__prefix`: prepended to the (possibly already-overridden) stem.
    Prefix,
    /// `__suffix`: appended to the (possibly already-overridden) stem.
    Suffix,
}

/// Which scopes an override applies to, mirroring the CLI qualifier grammar
/// in spec §6 (`!` global, `%` project, `/` or `dir/` scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideQualifier {
    Global,
    Project,
    Scope(Option<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct Override {
    pub kind: OverrideKind,
    pub qualifier: OverrideQualifier,
    pub value: Value,
    /// Position in the registration order; overrides of the same kind that
    /// apply are combined outer-to-inner in this order (§4.2).
    pub order: usize,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub type_id: Option<ValueTypeId>,
    pub visibility: Visibility,
    pub overridable: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum VariableError {
    #[error("variable '{0}' already entered with a different type")]
    TypeMismatch(String),
    #[error("variable pool is read-only outside the load phase")]
    NotLoadPhase,
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("variable '{0}' is not overridable")]
    NotOverridable(String),
    #[error("cannot introduce a typed override on untyped variable '{0}'")]
    TypedOverrideOnUntyped(String),
    #[error("global-visibility override '{0}' cannot be scope-qualified")]
    ScopeQualifiedGlobal(String),
}

struct VarEntry {
    var: Variable,
    /// Whether `var`'s attributes were set explicitly (vs. inherited from a
    /// pattern) — governs whether a later, more specific pattern may still
    /// retrofit it.
    explicit: bool,
    value: Value,
    overrides: Vec<Override>,
}

/// `prefix*suffix` (single segment) or `prefix**suffix` (crosses `.`).
#[derive(Debug, Clone)]
pub struct VariablePattern {
    pub prefix: String,
    pub suffix: String,
    pub dotted: bool,
    pub type_id: Option<ValueTypeId>,
    pub visibility: Visibility,
    pub overridable: bool,
}

impl VariablePattern {
    fn specificity(&self) -> usize {
        self.prefix.len() + self.suffix.len()
    }

    fn matches(&self, name: &str) -> bool {
        if !name.starts_with(&self.prefix) || !name.ends_with(&self.suffix) {
            return false;
        }
        if name.len() < self.prefix.len() + self.suffix.len() {
            return false;
        }
        let mid = &name[self.prefix.len()..name.len() - self.suffix.len()];
        self.dotted || !mid.contains('.')
    }
}

/// Whether a pool is the process-wide shared pool (load-phase insertion
/// discipline applies) or a fresh, freely-writable pool (e.g. one under
/// construction before it is attached to a context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Writable,
    SharedLoadOnly,
}

pub struct VariablePool {
    mode: PoolMode,
    entries: HashMap<String, VarEntry>,
    patterns: Vec<VariablePattern>,
    next_override_order: usize,
}

impl VariablePool {
    pub fn new(mode: PoolMode) -> Self {
        VariablePool {
            mode,
            entries: HashMap::new(),
            patterns: Vec::new(),
            next_override_order: 0,
        }
    }

    fn check_load_phase(&self, in_load: bool) -> Result<(), VariableError> {
        if self.mode == PoolMode::SharedLoadOnly && !in_load {
            return Err(VariableError::NotLoadPhase);
        }
        Ok(())
    }

    /// Registers a variable pattern. Can be called at any time; does not
    /// retroactively touch existing entries until `retrofit_patterns` is
    /// called (typically right after load-phase parsing of pattern
    /// directives completes).
    pub fn add_pattern(&mut self, pattern: VariablePattern) {
        self.patterns.push(pattern);
    }

    fn best_pattern(&self, name: &str) -> Option<&VariablePattern> {
        self.patterns
            .iter()
            .filter(|p| p.matches(name))
            .max_by_key(|p| p.specificity())
    }

    /// Applies the most specific matching pattern to every entry whose
    /// attributes were not set explicitly. Existing raw values are
    /// typified under the newly-adopted type.
    pub fn retrofit_patterns(&mut self, in_load: bool) -> Result<(), VariableError> {
        self.check_load_phase(in_load)?;
        let names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.explicit)
            .map(|(n, _)| n.clone())
            .collect();
        for name in names {
            if let Some(p) = self.best_pattern(&name) {
                let (t, vis, over) = (p.type_id, p.visibility, p.overridable);
                let entry = self.entries.get_mut(&name).unwrap();
                entry.var.type_id = t;
                entry.var.visibility = vis;
                entry.var.overridable = over;
                if let Some(t) = t {
                    if entry.value.type_id().is_none() {
                        let raw = entry.value.extract_names();
                        entry.value.assign(raw, Some(t))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Enters a variable with explicit attributes, or returns the existing
    /// entry's `Variable` if already present (attributes must match).
    pub fn declare(
        &mut self,
        name: &str,
        type_id: Option<ValueTypeId>,
        visibility: Visibility,
        overridable: bool,
        in_load: bool,
    ) -> Result<(), VariableError> {
        if let Some(existing) = self.entries.get(name) {
            if existing.explicit && existing.var.type_id != type_id {
                return Err(VariableError::TypeMismatch(name.to_string()));
            }
            return Ok(());
        }
        self.check_load_phase(in_load)?;
        let pattern = self.best_pattern(name).cloned();
        let (type_id, visibility, overridable, explicit) = match pattern {
            Some(p) if type_id.is_none() => (p.type_id, p.visibility, p.overridable, false),
            _ => (type_id, visibility, overridable, true),
        };
        self.entries.insert(
            name.to_string(),
            VarEntry {
                var: Variable { name: name.to_string(), type_id, visibility, overridable },
                explicit,
                value: Value::null(),
                overrides: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name).map(|e| &e.var)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Assigns a name sequence to `name`, declaring it on the fly (untyped,
    /// scope visibility, overridable) if it doesn't already exist.
    pub fn assign(&mut self, name: &str, names: Vec<Name>, in_load: bool) -> Result<(), VariableError> {
        if !self.entries.contains_key(name) {
            self.declare(name, None, Visibility::Scope, true, in_load)?;
        } else {
            self.check_load_phase(in_load)?;
        }
        let entry = self.entries.get_mut(name).unwrap();
        entry.value.assign(names, entry.var.type_id)?;
        Ok(())
    }

    pub fn append(&mut self, name: &str, names: &[Name], in_load: bool) -> Result<(), VariableError> {
        self.check_load_phase(in_load)?;
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| VariableError::TypeMismatch(name.to_string()))?;
        entry.value.append(names, name)?;
        Ok(())
    }

    pub fn prepend(&mut self, name: &str, names: &[Name], in_load: bool) -> Result<(), VariableError> {
        self.check_load_phase(in_load)?;
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| VariableError::TypeMismatch(name.to_string()))?;
        entry.value.prepend(names, name)?;
        Ok(())
    }

    /// The "original" value as currently assigned (pre-override). `None` if
    /// the variable has never been assigned.
    pub fn original(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|e| &e.value)
    }

    /// Iterates every declared entry as `(name, variable, original value)`,
    /// in no particular order. Used by front-ends that persist a pool's
    /// contents (e.g. `config.build`) rather than by the engine itself.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable, &Value)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), &e.var, &e.value))
    }

    /// Registers a CLI override. Rejects the three malformed combinations
    /// enumerated in §4.1.
    pub fn add_override(
        &mut self,
        name: &str,
        kind: OverrideKind,
        qualifier: OverrideQualifier,
        value: Value,
    ) -> Result<(), VariableError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| VariableError::TypeMismatch(name.to_string()))?;
        if !entry.var.overridable {
            return Err(VariableError::NotOverridable(name.to_string()));
        }
        if entry.var.type_id.is_none() && value.type_id().is_some() {
            return Err(VariableError::TypedOverrideOnUntyped(name.to_string()));
        }
        if entry.var.visibility == Visibility::Global && !matches!(qualifier, OverrideQualifier::Global) {
            return Err(VariableError::ScopeQualifiedGlobal(name.to_string()));
        }
        let order = self.next_override_order;
        self.next_override_order += 1;
        entry.overrides.push(Override { kind, qualifier, value, order });
        Ok(())
    }

    /// Computes the effective value after applying registered overrides,
    /// per §4.2: pick the most specific applicable `__override` as the stem
    /// (or the original value if none applies), then fold in `__prefix` /
    /// `__suffix` overrides registered after the stem, in order.
    ///
    /// `in_scope_dir` / `in_project` describe where the lookup is happening,
    /// used to decide which scope-qualified overrides are visible.
    pub fn lookup_override(
        &self,
        name: &str,
        in_scope_dir: &std::path::Path,
        var_name_for_errors: &str,
    ) -> Option<(Value, bool)> {
        let entry = self.entries.get(name)?;
        let applicable = |q: &OverrideQualifier| -> bool {
            match q {
                OverrideQualifier::Global => true,
                OverrideQualifier::Project => true,
                OverrideQualifier::Scope(None) => true,
                OverrideQualifier::Scope(Some(dir)) => in_scope_dir.starts_with(dir),
            }
        };

        let mut stem = entry.value.clone();
        let mut stem_order = 0usize;
        let mut original_in_effect = true;

        for ov in entry.overrides.iter().filter(|o| o.kind == OverrideKind::Replace && applicable(&o.qualifier)) {
            if ov.order >= stem_order {
                stem = ov.value.clone();
                stem_order = ov.order;
                original_in_effect = false;
            }
        }

        let mut prefixes: Vec<&Override> = entry
            .overrides
            .iter()
            .filter(|o| o.kind == OverrideKind::Prefix && o.order >= stem_order && applicable(&o.qualifier))
            .collect();
        let mut suffixes: Vec<&Override> = entry
            .overrides
            .iter()
            .filter(|o| o.kind == OverrideKind::Suffix && applicable(&o.qualifier) && o.order >= stem_order)
            .collect();
        prefixes.sort_by_key(|o| o.order);
        suffixes.sort_by_key(|o| o.order);

        for p in prefixes {
            let names = p.value.extract_names();
            let _ = stem.prepend(&names, var_name_for_errors);
            original_in_effect = false;
        }
        for s in suffixes {
            let names = s.value.extract_names();
            let _ = stem.append(&names, var_name_for_errors);
            original_in_effect = false;
        }

        Some((stem, original_in_effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Name;

    fn n(s: &str) -> Name {
        Name::new(s)
    }

    #[test]
    fn override_composition_prefix_suffix() {
        let mut pool = VariablePool::new(PoolMode::Writable);
        pool.declare("config.cxx.coptions", Some(ValueTypeId::Strings), Visibility::Project, true, true)
            .unwrap();
        pool.assign("config.cxx.coptions", vec![n("-Wall")], true).unwrap();

        pool.add_override(
            "config.cxx.coptions",
            OverrideKind::Suffix,
            OverrideQualifier::Global,
            Value::typed(crate::value::ValueData::Strings(vec!["-O2".into()])),
        )
        .unwrap();

        let (val, original) = pool
            .lookup_override("config.cxx.coptions", std::path::Path::new("/x"), "config.cxx.coptions")
            .unwrap();
        assert!(!original);
        assert_eq!(val.as_strings().unwrap(), &["-Wall".to_string(), "-O2".to_string()]);
    }

    #[test]
    fn no_override_returns_original_and_flag() {
        let mut pool = VariablePool::new(PoolMode::Writable);
        pool.declare("x", None, Visibility::Scope, true, true).unwrap();
        pool.assign("x", vec![n("1")], true).unwrap();
        let (val, original) = pool.lookup_override("x", std::path::Path::new("/"), "x").unwrap();
        assert!(original);
        assert_eq!(val, *pool.original("x").unwrap());
    }

    #[test]
    fn reject_override_on_non_overridable() {
        let mut pool = VariablePool::new(PoolMode::Writable);
        pool.declare("x", None, Visibility::Scope, false, true).unwrap();
        let err = pool
            .add_override("x", OverrideKind::Replace, OverrideQualifier::Global, Value::null())
            .unwrap_err();
        assert!(matches!(err, VariableError::NotOverridable(_)));
    }

    #[test]
    fn reject_typed_override_on_untyped_var() {
        let mut pool = VariablePool::new(PoolMode::Writable);
        pool.declare("x", None, Visibility::Scope, true, true).unwrap();
        let typed = Value::typed(crate::value::ValueData::Bool(true));
        let err = pool
            .add_override("x", OverrideKind::Replace, OverrideQualifier::Global, typed)
            .unwrap_err();
        assert!(matches!(err, VariableError::TypedOverrideOnUntyped(_)));
    }

    #[test]
    fn reject_scope_qualified_global_override() {
        let mut pool = VariablePool::new(PoolMode::Writable);
        pool.declare("x", None, Visibility::Global, true, true).unwrap();
        let err = pool
            .add_override(
                "x",
                OverrideKind::Replace,
                OverrideQualifier::Scope(Some(PathBuf::from("/a"))),
                Value::null(),
            )
            .unwrap_err();
        assert!(matches!(err, VariableError::ScopeQualifiedGlobal(_)));
    }

    #[test]
    fn pattern_retrofit_applies_most_specific() {
        let mut pool = VariablePool::new(PoolMode::Writable);
        pool.add_pattern(VariablePattern {
            prefix: "config.".into(),
            suffix: "".into(),
            dotted: true,
            type_id: Some(ValueTypeId::Strings),
            visibility: Visibility::Project,
            overridable: true,
        });
        pool.add_pattern(VariablePattern {
            prefix: "config.cxx.".into(),
            suffix: "".into(),
            dotted: true,
            type_id: Some(ValueTypeId::Paths),
            visibility: Visibility::Project,
            overridable: true,
        });
        pool.declare("config.cxx.include", None, Visibility::Scope, true, true).unwrap();
        pool.retrofit_patterns(true).unwrap();
        assert_eq!(pool.get_variable("config.cxx.include").unwrap().type_id, Some(ValueTypeId::Paths));
    }
}
