// ============================================================================
// config_file.rs — config.build persisted variable dump
// ============================================================================
//
// A project's persisted configuration is a flat, line-oriented text file:
// one `name = value` assignment per line, blank lines and `#`-comments
// tolerated, values stored in their printed name-sequence form (the same
// tokens a buildfile assignment would use, not a generic serde encoding —
// a user is expected to be able to read and hand-edit this file). It's
// intentionally dumber than the variable pool it's generated from: no
// types, no visibility, no overrides, just the last-assigned value of each
// variable the caller chose to persist.
// ============================================================================

use std::fs;
use std::io;
use std::path::Path;

use crate::value::Name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Vec<Name>,
}

/// Writes `entries` sorted by name, so the file's diff is stable across
/// runs regardless of the order variables were declared in.
pub fn write(path: &Path, entries: &[ConfigEntry]) -> io::Result<()> {
    let mut sorted: Vec<&ConfigEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::new();
    out.push_str("# config.build -- generated, but safe to hand-edit\n");
    for entry in sorted {
        let joined = entry.value.iter().map(Name::as_str).collect::<Vec<_>>().join(" ");
        out.push_str(&entry.name);
        out.push_str(" = ");
        out.push_str(&joined);
        out.push('\n');
    }
    fs::write(path, out)
}

/// Reads `path`, if it exists. A missing file yields an empty list (fresh
/// project, nothing configured yet).
pub fn read(path: &Path) -> io::Result<Vec<ConfigEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq) = line.find('=') else { continue };
        let name = line[..eq].trim().to_string();
        let raw_value = line[eq + 1..].trim();
        let value = if raw_value.is_empty() {
            Vec::new()
        } else {
            raw_value.split_whitespace().map(Name::new).collect()
        };
        entries.push(ConfigEntry { name, value });
    }
    Ok(entries)
}
