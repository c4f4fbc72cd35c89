// ============================================================================
// value.rs — typed values and the name/value conversion layer
// ============================================================================
//
// A `Value` is either untyped (a sequence of `Name` tokens straight out of a
// buildfile) or typed (one of a fixed set of `ValueTypeId`s). Typification is
// one-way: once a variable's value has been converted to a concrete type, it
// stays that type for the life of the pool entry (see variable.rs).
//
// Rust gives us a closed sum type for free, so the "v-table" the original
// engine dispatches through per value type is modeled here as a match over
// `ValueTypeId` rather than as trait objects — there is a fixed, known set of
// types and no application ever adds a new one at runtime.
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A single buildfile token: an unquoted, unevaluated string.
///
/// Untyped values are sequences of these; typification consumes them to
/// build a concrete `ValueData` variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(pub String);

impl Name {
    pub fn new(s: impl Into<String>) -> Self {
        Name(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name(s)
    }
}

/// Two names joined by `@` in the source (e.g. `recall@effect`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamePair(pub Name, pub Name);

/// A resolved process: the path as the user/rule specified it (`recall`,
/// which may rely on `PATH` lookup) and the path actually executed
/// (`effect`, normally canonicalized). Absent an `@`-pair, the two coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessPath {
    pub recall: PathBuf,
    pub effect: PathBuf,
}

impl ProcessPath {
    pub fn simple(p: impl Into<PathBuf>) -> Self {
        let p = p.into();
        ProcessPath { recall: p.clone(), effect: p }
    }
}

/// `cpu-vendor-system[-version]`, e.g. `x86_64-unknown-linux-gnu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetTriplet {
    pub cpu: String,
    pub vendor: String,
    pub system: String,
    pub version: Option<String>,
}

impl TargetTriplet {
    pub fn parse(s: &str) -> Result<Self, ValueError> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() < 3 {
            return Err(ValueError::InvalidValue {
                name: s.to_string(),
                type_name: "target_triplet",
            });
        }
        Ok(TargetTriplet {
            cpu: parts[0].to_string(),
            vendor: parts[1].to_string(),
            system: parts[2..].join("-"),
            version: None,
        })
    }
}

impl fmt::Display for TargetTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.cpu, self.vendor, self.system)?;
        if let Some(v) = &self.version {
            write!(f, "-{v}")?;
        }
        Ok(())
    }
}

/// The fixed set of value types the engine understands natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTypeId {
    Bool,
    UInt64,
    String,
    Path,
    Dir,
    AbsDir,
    Name,
    NamePair,
    ProcessPath,
    TargetTriplet,
    Bools,
    UInt64s,
    Strings,
    Paths,
    Dirs,
    Names,
}

impl ValueTypeId {
    pub fn type_name(self) -> &'static str {
        match self {
            ValueTypeId::Bool => "bool",
            ValueTypeId::UInt64 => "uint64",
            ValueTypeId::String => "string",
            ValueTypeId::Path => "path",
            ValueTypeId::Dir => "dir_path",
            ValueTypeId::AbsDir => "abs_dir_path",
            ValueTypeId::Name => "name",
            ValueTypeId::NamePair => "name_pair",
            ValueTypeId::ProcessPath => "process_path",
            ValueTypeId::TargetTriplet => "target_triplet",
            ValueTypeId::Bools => "bool[]",
            ValueTypeId::UInt64s => "uint64[]",
            ValueTypeId::Strings => "string[]",
            ValueTypeId::Paths => "path[]",
            ValueTypeId::Dirs => "dir_path[]",
            ValueTypeId::Names => "name[]",
        }
    }

    /// Whether this is a sequence type (append/prepend concatenate elements
    /// rather than requiring a fresh scalar conversion).
    pub fn is_sequence(self) -> bool {
        matches!(
            self,
            ValueTypeId::Bools
                | ValueTypeId::UInt64s
                | ValueTypeId::Strings
                | ValueTypeId::Paths
                | ValueTypeId::Dirs
                | ValueTypeId::Names
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    Untyped(Vec<Name>),
    Bool(bool),
    UInt64(u64),
    String(String),
    Path(PathBuf),
    Dir(PathBuf),
    AbsDir(PathBuf),
    Name(Name),
    NamePair(NamePair),
    ProcessPath(ProcessPath),
    TargetTriplet(TargetTriplet),
    Bools(Vec<bool>),
    UInt64s(Vec<u64>),
    Strings(Vec<String>),
    Paths(Vec<PathBuf>),
    Dirs(Vec<PathBuf>),
    Names(Vec<Name>),
}

impl ValueData {
    pub fn type_id(&self) -> Option<ValueTypeId> {
        match self {
            ValueData::Untyped(_) => None,
            ValueData::Bool(_) => Some(ValueTypeId::Bool),
            ValueData::UInt64(_) => Some(ValueTypeId::UInt64),
            ValueData::String(_) => Some(ValueTypeId::String),
            ValueData::Path(_) => Some(ValueTypeId::Path),
            ValueData::Dir(_) => Some(ValueTypeId::Dir),
            ValueData::AbsDir(_) => Some(ValueTypeId::AbsDir),
            ValueData::Name(_) => Some(ValueTypeId::Name),
            ValueData::NamePair(_) => Some(ValueTypeId::NamePair),
            ValueData::ProcessPath(_) => Some(ValueTypeId::ProcessPath),
            ValueData::TargetTriplet(_) => Some(ValueTypeId::TargetTriplet),
            ValueData::Bools(_) => Some(ValueTypeId::Bools),
            ValueData::UInt64s(_) => Some(ValueTypeId::UInt64s),
            ValueData::Strings(_) => Some(ValueTypeId::Strings),
            ValueData::Paths(_) => Some(ValueTypeId::Paths),
            ValueData::Dirs(_) => Some(ValueTypeId::Dirs),
            ValueData::Names(_) => Some(ValueTypeId::Names),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ValueData::Untyped(v) | ValueData::Names(v) => v.is_empty(),
            ValueData::String(s) => s.is_empty(),
            ValueData::Bools(v) => v.is_empty(),
            ValueData::UInt64s(v) => v.is_empty(),
            ValueData::Strings(v) => v.is_empty(),
            ValueData::Paths(v) | ValueData::Dirs(v) => v.is_empty(),
            _ => false,
        }
    }

    /// Reverse a typed value back into its name-sequence representation.
    /// Round-trips with `from_names` for every type this module defines.
    pub fn reverse_to_names(&self) -> Vec<Name> {
        match self {
            ValueData::Untyped(ns) => ns.clone(),
            ValueData::Bool(b) => vec![Name::new(if *b { "true" } else { "false" })],
            ValueData::UInt64(n) => vec![Name::new(n.to_string())],
            ValueData::String(s) => vec![Name::new(s.clone())],
            ValueData::Path(p) | ValueData::Dir(p) | ValueData::AbsDir(p) => {
                vec![Name::new(p.to_string_lossy().into_owned())]
            }
            ValueData::Name(n) => vec![n.clone()],
            ValueData::NamePair(NamePair(a, b)) => {
                vec![Name::new(format!("{a}@{b}"))]
            }
            ValueData::ProcessPath(p) => {
                if p.recall == p.effect {
                    vec![Name::new(p.recall.to_string_lossy().into_owned())]
                } else {
                    vec![Name::new(format!(
                        "{}@{}",
                        p.recall.to_string_lossy(),
                        p.effect.to_string_lossy()
                    ))]
                }
            }
            ValueData::TargetTriplet(t) => vec![Name::new(t.to_string())],
            ValueData::Bools(v) => v
                .iter()
                .map(|b| Name::new(if *b { "true" } else { "false" }))
                .collect(),
            ValueData::UInt64s(v) => v.iter().map(|n| Name::new(n.to_string())).collect(),
            ValueData::Strings(v) => v.iter().map(|s| Name::new(s.clone())).collect(),
            ValueData::Paths(v) | ValueData::Dirs(v) => v
                .iter()
                .map(|p| Name::new(p.to_string_lossy().into_owned()))
                .collect(),
            ValueData::Names(v) => v.clone(),
        }
    }

    /// Typify a name sequence into `t`. This is the only direction in which
    /// a value ever crosses the untyped/typed boundary after load.
    pub fn from_names(t: ValueTypeId, names: &[Name]) -> Result<ValueData, ValueError> {
        if t.is_sequence() {
            return Self::sequence_from_names(t, names);
        }
        let one = match names {
            [single] => single,
            _ => {
                return Err(ValueError::InvalidValue {
                    name: names.iter().map(Name::as_str).collect::<Vec<_>>().join(" "),
                    type_name: t.type_name(),
                })
            }
        };
        Self::scalar_from_name(t, one)
    }

    fn scalar_from_name(t: ValueTypeId, n: &Name) -> Result<ValueData, ValueError> {
        let bad = || ValueError::InvalidValue {
            name: n.0.clone(),
            type_name: t.type_name(),
        };
        Ok(match t {
            ValueTypeId::Bool => ValueData::Bool(parse_bool(&n.0).ok_or_else(bad)?),
            ValueTypeId::UInt64 => ValueData::UInt64(n.0.parse::<u64>().map_err(|_| bad())?),
            ValueTypeId::String => ValueData::String(n.0.clone()),
            ValueTypeId::Path => ValueData::Path(PathBuf::from(&n.0)),
            ValueTypeId::Dir => ValueData::Dir(PathBuf::from(&n.0)),
            ValueTypeId::AbsDir => {
                let p = PathBuf::from(&n.0);
                if !p.is_absolute() {
                    return Err(bad());
                }
                ValueData::AbsDir(p)
            }
            ValueTypeId::Name => ValueData::Name(n.clone()),
            ValueTypeId::NamePair => {
                let (a, b) = split_pair(&n.0).ok_or_else(bad)?;
                ValueData::NamePair(NamePair(Name::new(a), Name::new(b)))
            }
            ValueTypeId::ProcessPath => match split_pair(&n.0) {
                Some((a, b)) => ValueData::ProcessPath(ProcessPath {
                    recall: PathBuf::from(a),
                    effect: PathBuf::from(b),
                }),
                None => ValueData::ProcessPath(ProcessPath::simple(&n.0)),
            },
            ValueTypeId::TargetTriplet => ValueData::TargetTriplet(
                TargetTriplet::parse(&n.0).map_err(|_| bad())?,
            ),
            _ => unreachable!("sequence types handled above"),
        })
    }

    fn sequence_from_names(t: ValueTypeId, names: &[Name]) -> Result<ValueData, ValueError> {
        Ok(match t {
            ValueTypeId::Bools => ValueData::Bools(
                names
                    .iter()
                    .map(|n| parse_bool(&n.0).ok_or_else(|| ValueError::InvalidValue {
                        name: n.0.clone(),
                        type_name: "bool",
                    }))
                    .collect::<Result<_, _>>()?,
            ),
            ValueTypeId::UInt64s => ValueData::UInt64s(
                names
                    .iter()
                    .map(|n| n.0.parse::<u64>().map_err(|_| ValueError::InvalidValue {
                        name: n.0.clone(),
                        type_name: "uint64",
                    }))
                    .collect::<Result<_, _>>()?,
            ),
            ValueTypeId::Strings => ValueData::Strings(names.iter().map(|n| n.0.clone()).collect()),
            ValueTypeId::Paths => {
                ValueData::Paths(names.iter().map(|n| PathBuf::from(&n.0)).collect())
            }
            ValueTypeId::Dirs => {
                ValueData::Dirs(names.iter().map(|n| PathBuf::from(&n.0)).collect())
            }
            ValueTypeId::Names => ValueData::Names(names.to_vec()),
            _ => unreachable!("scalar types handled above"),
        })
    }

    /// Append `names` to self. `None` on the append-not-supported combination
    /// (callers attach the variable name to the diagnostic).
    pub fn append_names(&mut self, names: &[Name]) -> Result<(), AppendError> {
        match self {
            ValueData::Untyped(v) => {
                v.extend(names.iter().cloned());
                Ok(())
            }
            ValueData::Strings(v) => {
                v.extend(names.iter().map(|n| n.0.clone()));
                Ok(())
            }
            ValueData::Bools(v) => {
                for n in names {
                    v.push(parse_bool(&n.0).ok_or(AppendError::NotSupported)?);
                }
                Ok(())
            }
            ValueData::UInt64s(v) => {
                for n in names {
                    v.push(n.0.parse().map_err(|_| AppendError::NotSupported)?);
                }
                Ok(())
            }
            ValueData::Paths(v) | ValueData::Dirs(v) => {
                v.extend(names.iter().map(|n| PathBuf::from(&n.0)));
                Ok(())
            }
            ValueData::Names(v) => {
                v.extend(names.iter().cloned());
                Ok(())
            }
            ValueData::String(s) => {
                for n in names {
                    if !s.is_empty() {
                        s.push(' ');
                    }
                    s.push_str(&n.0);
                }
                Ok(())
            }
            _ => Err(AppendError::NotSupported),
        }
    }

    /// Prepend `names` to self (same support matrix as append).
    pub fn prepend_names(&mut self, names: &[Name]) -> Result<(), AppendError> {
        match self {
            ValueData::Untyped(v) => {
                let mut out = names.to_vec();
                out.append(v);
                *v = out;
                Ok(())
            }
            ValueData::Strings(v) => {
                let mut out: Vec<String> = names.iter().map(|n| n.0.clone()).collect();
                out.append(v);
                *v = out;
                Ok(())
            }
            ValueData::Names(v) => {
                let mut out = names.to_vec();
                out.append(v);
                *v = out;
                Ok(())
            }
            ValueData::Paths(v) | ValueData::Dirs(v) => {
                let mut out: Vec<PathBuf> = names.iter().map(|n| PathBuf::from(&n.0)).collect();
                out.append(v);
                *v = out;
                Ok(())
            }
            ValueData::String(s) => {
                let prefix: String = names
                    .iter()
                    .map(Name::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                if prefix.is_empty() {
                    return Ok(());
                }
                if s.is_empty() {
                    *s = prefix;
                } else {
                    *s = format!("{prefix} {s}");
                }
                Ok(())
            }
            _ => Err(AppendError::NotSupported),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Split `a@b` on the first unescaped `@`. Returns `None` if there is no `@`.
fn split_pair(s: &str) -> Option<(&str, &str)> {
    s.find('@').map(|i| (&s[..i], &s[i + 1..]))
}

#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("invalid value '{name}' for type {type_name}")]
    InvalidValue { name: String, type_name: &'static str },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppendError {
    #[error("append/prepend not supported for this value type")]
    NotSupported,
}

/// A value: either null, or present with `data` holding the untyped names or
/// one of the typed representations.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    data: Option<ValueData>,
}

impl Value {
    pub fn null() -> Self {
        Value { data: None }
    }

    pub fn untyped(names: Vec<Name>) -> Self {
        Value { data: Some(ValueData::Untyped(names)) }
    }

    pub fn typed(data: ValueData) -> Self {
        Value { data: Some(data) }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            None => true,
            Some(d) => d.is_empty(),
        }
    }

    pub fn type_id(&self) -> Option<ValueTypeId> {
        self.data.as_ref().and_then(ValueData::type_id)
    }

    pub fn data(&self) -> Option<&ValueData> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<ValueData> {
        self.data
    }

    /// Reset to an empty value of the same type (or empty untyped, if null
    /// or already untyped).
    pub fn reset(&mut self) {
        self.data = match self.data.take() {
            None => None,
            Some(d) => Some(match d.type_id() {
                None => ValueData::Untyped(vec![]),
                Some(t) => ValueData::from_names(t, &[]).unwrap_or(ValueData::Untyped(vec![])),
            }),
        };
    }

    /// Assign from a name sequence, typifying into `t` if given.
    pub fn assign(&mut self, names: Vec<Name>, t: Option<ValueTypeId>) -> Result<(), ValueError> {
        self.data = Some(match t {
            None => ValueData::Untyped(names),
            Some(t) => ValueData::from_names(t, &names)?,
        });
        Ok(())
    }

    pub fn append(&mut self, names: &[Name], var_name: &str) -> Result<(), ValueError> {
        match &mut self.data {
            None => {
                self.data = Some(ValueData::Untyped(names.to_vec()));
                Ok(())
            }
            Some(d) => d.append_names(names).map_err(|_| ValueError::InvalidValue {
                name: format!("append to '{var_name}'"),
                type_name: d.type_id().map(ValueTypeId::type_name).unwrap_or("untyped"),
            }),
        }
    }

    pub fn prepend(&mut self, names: &[Name], var_name: &str) -> Result<(), ValueError> {
        match &mut self.data {
            None => {
                self.data = Some(ValueData::Untyped(names.to_vec()));
                Ok(())
            }
            Some(d) => d.prepend_names(names).map_err(|_| ValueError::InvalidValue {
                name: format!("prepend to '{var_name}'"),
                type_name: d.type_id().map(ValueTypeId::type_name).unwrap_or("untyped"),
            }),
        }
    }

    pub fn extract_names(&self) -> Vec<Name> {
        match &self.data {
            None => vec![],
            Some(d) => d.reverse_to_names(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.data {
            Some(ValueData::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uint64(&self) -> Option<u64> {
        match &self.data {
            Some(ValueData::UInt64(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.data {
            Some(ValueData::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.data {
            Some(ValueData::Strings(v)) => Some(v),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match &self.data {
            Some(ValueData::Path(p) | ValueData::Dir(p) | ValueData::AbsDir(p)) => Some(p),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}
