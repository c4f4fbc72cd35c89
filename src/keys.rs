// ============================================================================
// keys.rs — target key string form (parsing and printing)
// ============================================================================
//
// A target can be named on the command line or in diagnostics as
// `[dir/]type{name[.ext]}[@out]`. The tricky part is `name.ext`: a literal
// `.` in a name is written doubled (`..`), so a single `.` always marks the
// extension boundary unambiguously. Every maximal run of dots in the raw
// string is folded the same way — a run of `2k` dots folds to `k` literal
// dots with no extension boundary; a run of `2k+1` dots folds to `k`
// literal dots plus one separator dot. Only the *last* run can carry the
// separator (an earlier run is always even-length, pure escaping); the
// remainder after it, if any, is the extension, and an empty remainder
// after a separator means "explicitly no extension" rather than
// "unspecified".
//
// So `foo.` is name `foo`, extension none; `foo..` is name `foo.`,
// extension unspecified; `foo...` is name `foo.`, extension none; and
// `foo...bar` is name `foo.`, extension `bar`. No dot at all leaves the
// extension unspecified (the target type's default applies).
// ============================================================================

use std::path::PathBuf;

use crate::target::{Extension, TargetKey};

/// Doubles every dot run in `s` except a lone interior (non-trailing) single
/// dot, which is left as a literal separator candidate. Returns the escaped
/// string and whether it still contains such an unescaped interior dot (the
/// `ed` flag below needs this to decide whether an `Unspecified` extension
/// needs a disambiguating `...` marker).
fn escape_dots(s: &str, force_escape_trailing: bool) -> (String, bool) {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    let mut out = String::new();
    let mut ed = false;
    let mut i = 0;
    while i < n {
        if chars[i] == '.' {
            let start = i;
            while i < n && chars[i] == '.' {
                i += 1;
            }
            let run_len = i - start;
            let trailing = i == n;
            if run_len == 1 && !(trailing && force_escape_trailing) {
                out.push('.');
                if !trailing {
                    ed = true;
                }
            } else {
                out.push_str(&".".repeat(run_len * 2));
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    (out, ed)
}

pub fn format_name_ext(name: &str, ext: &Extension) -> String {
    let (escaped, ed) = escape_dots(name, true);
    match ext {
        Extension::None => {
            if name.ends_with('.') {
                escaped
            } else {
                format!("{escaped}.")
            }
        }
        Extension::Some(e) => {
            let (escaped_ext, _) = escape_dots(e, false);
            let sep = if escaped_ext.starts_with('.') { "..." } else { "." };
            format!("{escaped}{sep}{escaped_ext}")
        }
        Extension::Unspecified => {
            if ed {
                format!("{escaped}...")
            } else {
                escaped
            }
        }
    }
}

/// Unescapes a string produced by `escape_dots`: every dot run of length
/// other than 1 is an escape sequence and folds to half as many literal
/// dots; a lone single dot is already literal.
fn unescape_dots(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    let mut out = String::new();
    let mut i = 0;
    while i < n {
        if chars[i] == '.' {
            let start = i;
            while i < n && chars[i] == '.' {
                i += 1;
            }
            let run_len = i - start;
            if run_len == 1 {
                out.push('.');
            } else {
                out.push_str(&".".repeat(run_len / 2));
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// Splits a raw `name[.ext]` token into base name and extension, following
/// the disambiguation grammar in spec §6: scanning right to left, the
/// rightmost triple-dot run always wins as "the chosen extension
/// separator" (trailing means default-unspecified, non-trailing means an
/// explicit extension follows); absent a triple dot, the rightmost lone
/// single dot is the separator (trailing means explicit no-extension);
/// every other dot run must be an even-length escape sequence, folding to
/// half as many literal dots.
pub fn parse_name_ext(raw: &str) -> (String, Extension) {
    let chars: Vec<char> = raw.chars().collect();
    let n = chars.len();
    if n == 0 {
        return (String::new(), Extension::Unspecified);
    }

    let mut edp: Option<usize> = None; // start index of the chosen extension-dot run
    let mut edn: usize = 0; // 1 or 3
    let mut dot_only = true;

    let mut p = n - 1;
    loop {
        if chars[p] == '.' {
            let mut i = p;
            while i != 0 && chars[i - 1] == '.' {
                i -= 1;
            }
            let sn = p - i + 1;
            if sn == 3 {
                edp = Some(i);
                edn = 3;
            } else if sn == 1 {
                if edp.is_none() {
                    edp = Some(i);
                    edn = 1;
                }
            }
            // Any other run length (even, or odd-and-not-3) is an escape
            // sequence or literal run; it's resolved uniformly below by
            // `unescape_dots` regardless of which branch set `edp`.
            p = i;
        } else {
            dot_only = false;
        }
        if p == 0 {
            break;
        }
        p -= 1;
    }

    if dot_only {
        return (raw.to_string(), Extension::Unspecified);
    }

    // A leading dot is never the extension separator.
    if edp == Some(0) {
        edp = None;
    }

    let (base_end, mut ext) = match edp {
        Some(e) if e != n - edn => {
            let suffix: String = chars[e + edn..].iter().collect();
            (e, Extension::Some(unescape_dots(&suffix)))
        }
        Some(e) if edn == 1 => (e, Extension::None),
        Some(e) => (e, Extension::Unspecified), // trailing triple dots
        None => {
            if chars[n - 1] == '.' {
                (n, Extension::None)
            } else {
                (n, Extension::Unspecified)
            }
        }
    };

    let base: String = chars[..base_end].iter().collect();
    let name = unescape_dots(&base);
    if let Extension::Some(e) = &ext {
        // Already unescaped above; keep as-is (avoid double-unescaping).
        ext = Extension::Some(e.clone());
    }
    (name, ext)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("target key '{0}' is missing a {{type}} part")]
    MissingType(String),
    #[error("target key '{0}' has an empty name")]
    MissingName(String),
}

/// Formats `key` as `[dir/]type{name[.ext]}[@out]`, re-escaping dots so the
/// result round-trips through `parse_key` unambiguously (§6).
pub fn format_key(key: &TargetKey) -> String {
    let name_ext = format_name_ext(&key.name, &key.ext);
    let dir = if key.out_dir.as_os_str().is_empty() {
        String::new()
    } else {
        format!("{}/", key.out_dir.display())
    };
    format!("{dir}{}{{{name_ext}}}", key.type_name)
}

/// Formats `key` with an explicit `@out` qualifier, for a target whose out
/// directory the caller wants to state even though it isn't the scope's own
/// (an out-qualified reference, e.g. to an imported prebuilt library).
pub fn format_key_with_out(key: &TargetKey) -> String {
    format!("{}@{}", format_key(key), key.out_dir.display())
}

pub fn parse_key(s: &str) -> Result<TargetKey, KeyParseError> {
    let (s, out_qualifier) = match s.rfind('@') {
        Some(i) => (&s[..i], Some(PathBuf::from(&s[i + 1..]))),
        None => (s, None),
    };

    let brace_start = s.find('{').ok_or_else(|| KeyParseError::MissingType(s.to_string()))?;
    let brace_end = s.rfind('}').ok_or_else(|| KeyParseError::MissingType(s.to_string()))?;
    if brace_end < brace_start {
        return Err(KeyParseError::MissingType(s.to_string()));
    }

    let before_type = &s[..brace_start];
    let type_start = before_type.rfind('/').map(|i| i + 1).unwrap_or(0);
    let dir = &before_type[..type_start];
    let type_name = &before_type[type_start..];
    let name_ext = &s[brace_start + 1..brace_end];
    if type_name.is_empty() {
        return Err(KeyParseError::MissingType(s.to_string()));
    }
    if name_ext.is_empty() {
        return Err(KeyParseError::MissingName(s.to_string()));
    }

    let (name, ext) = parse_name_ext(name_ext);
    let out_dir = out_qualifier.unwrap_or_else(|| {
        if dir.is_empty() { PathBuf::new() } else { PathBuf::from(dir.trim_end_matches('/')) }
    });
    Ok(TargetKey { type_name: type_name.to_string(), out_dir, src_dir: PathBuf::new(), name, ext })
}
