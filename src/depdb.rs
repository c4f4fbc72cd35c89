// ============================================================================
// depdb.rs — per-target dependency database
// ============================================================================
//
// Each target that needs to remember something across runs beyond its
// mtime (the compiler flags it was last built with, the set of headers it
// last discovered, the environment variables its recipe depends on) gets a
// depdb file alongside its output. It's a flat, append-only sequence of
// typed lines:
//
//   1 <n>              version header, always first
//   H <hex digest>     a hash stanza (e.g. of the command line used)
//   S <text>           a string blob (e.g. a discovered header path)
//   E <hex digest>     a hash of the subset of the environment the recipe
//                      declared it depends on
//   C                  close marker
//
// A recipe compares the current command line's hash against the last `H`
// line, and the current environment hash against the last `E` line; either
// mismatching forces a rebuild the same way a stale mtime would.
//
// Lines are appended one at a time as the recipe runs (so a build killed
// partway through still leaves a partially useful trace), and the file is
// only atomically replaced — via write-to-temp-then-rename — when it is
// closed. A file missing the close marker was left behind by an
// interrupted run and is treated as fully stale.
// ============================================================================

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Hash(String),
    String(String),
    EnvHash(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepDb {
    pub version: u32,
    pub lines: Vec<Line>,
    /// `false` if the file was read without finding a trailing close
    /// marker — the previous write was interrupted and every line in it
    /// should be treated as untrustworthy.
    pub closed: bool,
}

impl DepDb {
    /// Reads an existing depdb, if one exists. A missing file is not an
    /// error: it just means there's no prior record (first build).
    pub fn read(path: &Path) -> io::Result<Option<DepDb>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let reader = BufReader::new(file);
        let mut lines_iter = reader.lines();

        let version = match lines_iter.next() {
            Some(Ok(header)) if header.starts_with('1') => {
                header[1..].trim().parse::<u32>().unwrap_or(VERSION)
            }
            _ => return Ok(Some(DepDb { version: VERSION, lines: Vec::new(), closed: false })),
        };

        let mut lines = Vec::new();
        let mut closed = false;
        for line in lines_iter {
            let line = line?;
            if let Some(rest) = line.strip_prefix("H ") {
                lines.push(Line::Hash(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix("S ") {
                lines.push(Line::String(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix("E ") {
                lines.push(Line::EnvHash(rest.to_string()));
            } else if line == "C" {
                closed = true;
            }
        }
        Ok(Some(DepDb { version, lines, closed }))
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.lines.iter().rev().find_map(|l| match l {
            Line::Hash(h) => Some(h.as_str()),
            _ => None,
        })
    }

    pub fn last_env_hash(&self) -> Option<&str> {
        self.lines.iter().rev().find_map(|l| match l {
            Line::EnvHash(h) => Some(h.as_str()),
            _ => None,
        })
    }

    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            Line::String(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends lines to a temp file next to `path`; `close()` renames it over
/// `path` atomically. Dropping a `DepDbWriter` without calling `close` is
/// exactly the "interrupted" case the reader detects.
pub struct DepDbWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: File,
}

impl DepDbWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let tmp_path = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
            None => "tmp".to_string(),
        });
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        writeln!(file, "1 {VERSION}")?;
        Ok(DepDbWriter { tmp_path, final_path: path.to_path_buf(), file })
    }

    pub fn write_hash(&mut self, hex_digest: &str) -> io::Result<()> {
        writeln!(self.file, "H {hex_digest}")
    }

    pub fn write_string(&mut self, s: &str) -> io::Result<()> {
        writeln!(self.file, "S {s}")
    }

    pub fn write_env_hash(&mut self, hex_digest: &str) -> io::Result<()> {
        writeln!(self.file, "E {hex_digest}")
    }

    /// Writes the close marker, flushes, and atomically replaces the real
    /// depdb file.
    pub fn close(mut self) -> io::Result<()> {
        writeln!(self.file, "C")?;
        self.file.flush()?;
        self.file.sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)
    }
}

/// Hashes a recipe's command line the way every depdb-consuming rule wants
/// it: a stable digest over the argv, independent of argument order only
/// when the rule itself canonicalizes it first.
pub fn hash_command(argv: &[String]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for arg in argv {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.o.d");
        assert!(DepDb::read(&path).unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trips_and_is_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.o.d");
        let mut w = DepDbWriter::create(&path).unwrap();
        w.write_hash("abc123").unwrap();
        w.write_string("include/foo.h").unwrap();
        w.write_env_hash("def456").unwrap();
        w.close().unwrap();

        let db = DepDb::read(&path).unwrap().unwrap();
        assert!(db.closed);
        assert_eq!(db.last_hash(), Some("abc123"));
        assert_eq!(db.last_env_hash(), Some("def456"));
        assert_eq!(db.strings().collect::<Vec<_>>(), vec!["include/foo.h"]);
    }

    #[test]
    fn interrupted_write_leaves_no_final_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.o.d");
        let mut w = DepDbWriter::create(&path).unwrap();
        w.write_hash("abc123").unwrap();
        drop(w); // never closed: tmp file is abandoned, real file untouched

        assert!(DepDb::read(&path).unwrap().is_none());
    }

    #[test]
    fn command_hash_is_order_sensitive_and_stable() {
        let a = hash_command(&["gcc".into(), "-O2".into(), "a.c".into()]);
        let b = hash_command(&["gcc".into(), "-O2".into(), "a.c".into()]);
        let c = hash_command(&["gcc".into(), "a.c".into(), "-O2".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
