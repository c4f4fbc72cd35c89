// ============================================================================
// diagnostics.rs — top-level error type and buffered child-process output
// ============================================================================
//
// `Failed` is the one error type the engine itself ever returns; everything
// that can go wrong inside the load/match/execute pipeline folds into it.
// `anyhow` stays at the demo front-end boundary (main.rs), same split the
// rest of the crate uses between a typed library error and a freeform CLI
// error.
//
// The other half of this module is the diagnostics *stream*: unlike the
// logger (log::info!/warn!/etc., for engine-internal tracing) this is output
// that belongs to the user driving a build — compiler/recipe stdout and
// stderr. In parallel builds that output from different targets would
// otherwise interleave line by line, so by default each child's output is
// buffered and flushed as one block when the recipe finishes. Serial builds
// (`-j1`, or the user passing `--no-diag-buffer`) stream lines immediately
// instead, since there's nothing to interleave with.
// ============================================================================

use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum Failed {
    #[error("{0}")]
    Graph(String),

    #[error("{0}")]
    Rule(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Variable(#[from] crate::variable::VariableError),

    #[error(transparent)]
    Value(#[from] crate::value::ValueError),

    #[error("recipe for '{target}' exited with status {status}")]
    RecipeStatus { target: String, status: i32 },

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Failed {
    pub fn graph(msg: impl Into<String>) -> Self {
        Failed::Graph(msg.into())
    }

    pub fn rule(msg: impl Into<String>) -> Self {
        Failed::Rule(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Failed::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Failed::Other(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Buffered diagnostics stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagMode {
    /// Accumulate a target's output and flush it as one block when the
    /// target's recipe finishes.
    Buffered,
    /// Write each line as it arrives.
    Streaming,
}

/// One child's accumulated output, written to under its own lock so
/// concurrent recipes never interleave mid-line.
pub struct ChildBuffer {
    target: String,
    mode: DiagMode,
    lines: Mutex<Vec<String>>,
}

impl ChildBuffer {
    pub fn new(target: impl Into<String>, mode: DiagMode) -> Self {
        ChildBuffer { target: target.into(), mode, lines: Mutex::new(Vec::new()) }
    }

    /// Records one line of output. In `Streaming` mode it is written to
    /// stderr immediately; in `Buffered` mode it's held until `flush`.
    pub fn push_line(&self, line: impl Into<String>) {
        let line = line.into();
        match self.mode {
            DiagMode::Streaming => {
                let mut out = std::io::stderr();
                let _ = writeln!(out, "{}", line);
            }
            DiagMode::Buffered => {
                self.lines.lock().unwrap().push(line);
            }
        }
    }

    /// Flushes any buffered lines as a single block (no-op in streaming
    /// mode, since lines already went out as they arrived).
    pub fn flush(&self) {
        if self.mode != DiagMode::Buffered {
            return;
        }
        let lines = std::mem::take(&mut *self.lines.lock().unwrap());
        if lines.is_empty() {
            return;
        }
        let mut out = std::io::stderr();
        let _ = writeln!(out, "{}:", self.target);
        for line in lines {
            let _ = writeln!(out, "  {}", line);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().unwrap().is_empty()
    }
}

/// Registry handed to the scheduler: one `ChildBuffer` per in-flight recipe,
/// plus the global mode decision (serial jobs always stream).
pub struct Diagnostics {
    mode: DiagMode,
}

impl Diagnostics {
    pub fn new(jobs: usize, no_buffer: bool) -> Self {
        let mode = if jobs <= 1 || no_buffer { DiagMode::Streaming } else { DiagMode::Buffered };
        Diagnostics { mode }
    }

    pub fn mode(&self) -> DiagMode {
        self.mode
    }

    pub fn buffer_for(&self, target: impl Into<String>) -> ChildBuffer {
        ChildBuffer::new(target, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_jobs_forces_streaming() {
        let d = Diagnostics::new(1, false);
        assert_eq!(d.mode(), DiagMode::Streaming);
    }

    #[test]
    fn parallel_jobs_buffer_by_default() {
        let d = Diagnostics::new(4, false);
        assert_eq!(d.mode(), DiagMode::Buffered);
    }

    #[test]
    fn no_diag_buffer_flag_forces_streaming() {
        let d = Diagnostics::new(4, true);
        assert_eq!(d.mode(), DiagMode::Streaming);
    }

    #[test]
    fn buffered_lines_held_until_flush() {
        let buf = ChildBuffer::new("libfoo", DiagMode::Buffered);
        buf.push_line("compiling foo.c");
        buf.push_line("compiling bar.c");
        assert!(!buf.is_empty());
        buf.flush();
        assert!(buf.is_empty());
    }
}
