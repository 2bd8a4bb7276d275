//! Classification of a finished child into a TAP result.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// The result of running one test's child process, already reduced to the
/// handful of shapes a TAP line can express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    /// Exited normally with status 0.
    Passed,
    /// Exited normally with a non-zero status.
    ExitCode(i32),
    /// Killed by the watchdog's own signal, after running for this many
    /// seconds.
    TimedOut(u64),
    /// Killed by any other signal.
    Signaled(i32),
    /// `waitpid` returned something that isn't a terminal status for a
    /// single untraced child (stopped, continued, still alive) — should not
    /// happen given the flags this runner waits with, but is not a panic.
    Unknown,
}

impl TestOutcome {
    /// Whether this outcome is a clean pass — the only case that emits a
    /// bare `ok` line with no diagnostics.
    pub fn is_pass(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    /// The parenthesized reason text for a `not ok` line, or `None` for a
    /// pass.
    pub fn reason(&self) -> Option<String> {
        match self {
            TestOutcome::Passed => None,
            TestOutcome::ExitCode(n) => Some(format!("exit code: {n}")),
            TestOutcome::TimedOut(secs) => Some(format!("timeout after {secs}s")),
            TestOutcome::Signaled(n) => Some(format!("killed by signal {n}")),
            TestOutcome::Unknown => Some("unknown failure".to_string()),
        }
    }
}

/// Reduces a raw `waitpid` status into a [`TestOutcome`], given the signal
/// this runner's watchdog uses to kill a hung child and the watchdog
/// duration that was armed for it.
pub fn classify(status: WaitStatus, watchdog_signal: Signal, watchdog_secs: u64) -> TestOutcome {
    match status {
        WaitStatus::Exited(_, 0) => TestOutcome::Passed,
        WaitStatus::Exited(_, code) => TestOutcome::ExitCode(code),
        WaitStatus::Signaled(_, signal, _) if signal == watchdog_signal => {
            TestOutcome::TimedOut(watchdog_secs)
        }
        WaitStatus::Signaled(_, signal, _) => TestOutcome::Signaled(signal as i32),
        _ => TestOutcome::Unknown,
    }
}
