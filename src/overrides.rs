// ============================================================================
// overrides.rs — CLI variable override grammar
// ============================================================================
//
// A command-line override has the form `[qualifier]name<op>value`:
//
//   qualifier (optional, default Scope(None) — the project root scope):
//     !          global
//     %          project
//     dir/       scope rooted at `dir`
//     /          scope rooted at the current directory (empty dir)
//
//   op:
//     =          replace the stem entirely
//     +=         suffix: append to the (possibly already-overridden) stem
//     =+         prefix: prepend to the (possibly already-overridden) stem
//
// e.g. `!config.import.path=/opt/pkg`, `libfoo/cxx.coptions+=-Wall`,
// `%install.root=/usr`.
// ============================================================================

use std::path::PathBuf;

use crate::value::{Name, Value};
use crate::variable::{Override, OverrideKind, OverrideQualifier};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideParseError {
    #[error("override '{0}' has no '=', '+=' or '=+' operator")]
    MissingOperator(String),
    #[error("override '{0}' has an empty variable name")]
    EmptyName(String),
}

pub struct ParsedOverride {
    pub name: String,
    pub kind: OverrideKind,
    pub qualifier: OverrideQualifier,
    pub raw_value: String,
}

impl ParsedOverride {
    /// Builds the untyped `Value`/`Override` pair ready for
    /// `VariablePool::add_override`. Typification (if the variable is
    /// typed) happens inside the pool, same as a buildfile assignment.
    pub fn to_override(&self, order: usize) -> Override {
        let names: Vec<Name> = if self.raw_value.is_empty() {
            Vec::new()
        } else {
            self.raw_value.split_whitespace().map(Name::new).collect()
        };
        Override {
            kind: self.kind,
            qualifier: self.qualifier.clone(),
            value: Value::untyped(names),
            order,
        }
    }
}

fn find_operator(s: &str) -> Option<(usize, usize, OverrideKind)> {
    let bytes = s.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] == b'+' && bytes.get(i + 1) == Some(&b'=') {
            return Some((i, i + 2, OverrideKind::Suffix));
        }
        if bytes[i] == b'=' && bytes.get(i + 1) == Some(&b'+') {
            return Some((i, i + 2, OverrideKind::Prefix));
        }
        if bytes[i] == b'=' {
            return Some((i, i + 1, OverrideKind::Replace));
        }
    }
    None
}

pub fn parse_override(arg: &str) -> Result<ParsedOverride, OverrideParseError> {
    let (op_start, op_end, kind) = find_operator(arg).ok_or_else(|| OverrideParseError::MissingOperator(arg.to_string()))?;
    let lhs = &arg[..op_start];
    let raw_value = arg[op_end..].to_string();

    let (qualifier, name) = if let Some(rest) = lhs.strip_prefix('!') {
        (OverrideQualifier::Global, rest)
    } else if let Some(rest) = lhs.strip_prefix('%') {
        (OverrideQualifier::Project, rest)
    } else if let Some(slash) = lhs.rfind('/') {
        let dir = &lhs[..slash];
        let name = &lhs[slash + 1..];
        let qualifier = if dir.is_empty() {
            OverrideQualifier::Scope(None)
        } else {
            OverrideQualifier::Scope(Some(PathBuf::from(dir)))
        };
        (qualifier, name)
    } else {
        (OverrideQualifier::Scope(None), lhs)
    };

    if name.is_empty() {
        return Err(OverrideParseError::EmptyName(arg.to_string()));
    }

    Ok(ParsedOverride { name: name.to_string(), kind, qualifier, raw_value })
}
