//! Exit code logic for the mirror process.
//!
//! Single responsibility: map a run outcome to the process exit status.

use std::process::ExitCode;

use mirror_core::orchestrator::RunSummary;

/// Process exit outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Drained; individual pages may still have failed.
    Success,
    /// Invalid configuration, missing output root or a failed walk.
    Failure,
    /// Interrupted before the frontier drained.
    Partial,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

/// Determines the process exit outcome from a finished run.
///
/// Per-page failures are reported in the summary and left as placeholders
/// for the next run; only an interruption makes the exit non-zero.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    if summary.interrupted {
        ProcessExit::Partial
    } else {
        ProcessExit::Success
    }
}
