//! Error types for Horizon Foundry.

use std::fmt;

/// The main error type for recoverable engine operations.
///
/// Only conditions the caller can reasonably react to are surfaced as
/// `EngineError`; programmer errors (using the engine before `init`,
/// mutating tunables after `init`, handing a task back to the wrong
/// lifecycle stage) are reported through [`FatalError`] instead.
#[derive(Debug)]
pub enum EngineError {
    /// No resource was available to admit the task: the id allocator is
    /// exhausted or the engine is shutting down.
    ///
    /// The engine state is unchanged; retrying after releasing a task
    /// (or simply later) is valid.
    Unavailable,
    /// Failed to spawn a worker thread while building the pool.
    WorkerSpawn(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => {
                write!(f, "No task slot available: id capacity exhausted or engine stopped")
            }
            Self::WorkerSpawn(msg) => {
                write!(f, "Failed to spawn worker thread: {msg}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// A specialized Result type for Horizon Foundry operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Classification of unrecoverable engine misuse.
///
/// Each kind carries a distinct integer code so a supervising process (or
/// a test harness matching panic messages) can tell which rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalKind {
    /// A tunable setter was called after the engine was initialized.
    AlreadyInitialized,
    /// An operation required the engine before `init` or after `destroy`.
    NotInitialized,
    /// A tunable was given a non-positive or otherwise nonsensical value.
    InvalidArgument,
    /// A task was used in a lifecycle stage that cannot accept the
    /// operation (re-running a pending task, releasing a running one).
    InvalidTask,
    /// The scheduler or a worker observed an internal record that the
    /// engine's invariants promise cannot exist.
    InvariantViolation,
}

impl FatalKind {
    /// The distinct process-level code for this kind.
    pub fn code(self) -> i32 {
        match self {
            Self::AlreadyInitialized => 10,
            Self::NotInitialized => 11,
            Self::InvalidArgument => 12,
            Self::InvalidTask => 13,
            Self::InvariantViolation => 14,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "engine already initialized",
            Self::NotInitialized => "engine not initialized",
            Self::InvalidArgument => "invalid engine argument",
            Self::InvalidTask => "task is not in a valid state for this operation",
            Self::InvariantViolation => "engine invariant violated",
        }
    }
}

/// An unrecoverable engine error.
///
/// The C lineage of this engine aborted the process with a numeric exit
/// code; the Rust rendition panics with a message that embeds the same
/// code, keeping the codes observable without taking the process down
/// from library code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalError {
    kind: FatalKind,
}

impl FatalError {
    pub(crate) fn new(kind: FatalKind) -> Self {
        Self { kind }
    }

    /// The kind of misuse that was detected.
    pub fn kind(&self) -> FatalKind {
        self.kind
    }

    /// The distinct integer code, identical to [`FatalKind::code`].
    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal engine error {}: {}", self.kind.code(), self.kind.message())
    }
}

impl std::error::Error for FatalError {}

/// Report an unrecoverable misuse and unwind.
pub(crate) fn fatal(kind: FatalKind) -> ! {
    let err = FatalError::new(kind);
    tracing::error!(target: crate::logging::targets::CORE, code = err.code(), "{err}");
    panic!("{err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let kinds = [
            FatalKind::AlreadyInitialized,
            FatalKind::NotInitialized,
            FatalKind::InvalidArgument,
            FatalKind::InvalidTask,
            FatalKind::InvariantViolation,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn display_embeds_code() {
        let err = FatalError::new(FatalKind::NotInitialized);
        let text = err.to_string();
        assert!(text.contains("fatal engine error 11"));
    }

    #[test]
    #[should_panic(expected = "fatal engine error 14")]
    fn fatal_panics_with_code() {
        fatal(FatalKind::InvariantViolation);
    }
}
