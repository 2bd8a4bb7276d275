//! The isolated per-test supervisor: capture file, fork, watchdog, wait,
//! classify, emit, unlink — one test at a time, strictly sequential.

use std::io::Write;
use std::os::fd::AsRawFd;

use anyhow::Result;
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult};
use tapdance_alloc::AllocatorCapability;
use tapdance_custodian::Custodian;

use crate::capture;
use crate::config::RunnerConfig;
use crate::descriptor::{TestBody, TestPlan};
use crate::diag::vprintln;
use crate::outcome::classify;
use crate::tap::TapWriter;

/// Signal the watchdog uses to kill a hung child. `SIGALRM`'s default
/// disposition already terminates the process, so the child never installs
/// a handler for it.
const WATCHDOG_SIGNAL: Signal = Signal::SIGALRM;

/// Runs every descriptor in `plan` under isolation, writing TAP v14 to
/// `out`. Per-test failures are always reported in-band; this only returns
/// `Err` for a harness-level problem (e.g. `out` itself failing), never for
/// an individual test's outcome — matching the harness's own contract that
/// it exits 0 regardless of what its tests did.
pub fn run_plan<W: Write>(plan: &TestPlan, config: &RunnerConfig, out: W) -> Result<()> {
    let mut tap = TapWriter::new(out);
    tap.version_and_plan(plan.len())?;

    for (index, descriptor) in plan.iter() {
        run_one(index, descriptor.display(), descriptor.body(), config, &mut tap)?;
    }

    Ok(())
}

fn run_one<W: Write>(
    index: usize,
    display: &str,
    body: TestBody,
    config: &RunnerConfig,
    tap: &mut TapWriter<W>,
) -> Result<()> {
    vprintln!("[{index}] {display}: creating capture file in {}", config.capture_dir.display());

    let capture_file = match capture::create(&config.capture_dir, index) {
        Ok(f) => f,
        Err(e) => {
            vprintln!("[{index}] {display}: capture file creation failed: {e:#}");
            tap.result_with_reason(index, display, "tmpfile creation failed")?;
            return Ok(());
        }
    };

    let watchdog_secs = config.watchdog.as_secs();

    // SAFETY: the child, before doing anything else observable, only
    // touches already-open file descriptors (dup2) and process-local state
    // (alarm, a fresh allocator/custodian) — it never runs atexit handlers,
    // allocator state, or buffered I/O inherited from the parent before
    // `exit`, satisfying `fork`'s async-signal-safety constraints for this
    // use.
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => run_child(capture_file.as_file(), body, watchdog_secs),
        Ok(ForkResult::Parent { child }) => {
            match waitpid(child, None) {
                Ok(status) => {
                    let outcome = classify(status, WATCHDOG_SIGNAL, watchdog_secs);
                    tap.result(index, display, &outcome)?;

                    if !outcome.is_pass() {
                        match capture_file.reopen() {
                            Ok(mut file) => {
                                if let Err(e) = capture::replay_as_diagnostics(&mut file, tap.raw()) {
                                    eprintln!("# failed to replay captured output for test {index}: {e}");
                                }
                            }
                            Err(e) => {
                                eprintln!("# failed to open test output for reading: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    vprintln!("[{index}] {display}: waitpid failed: {e}");
                    tap.result_with_reason(index, display, "unknown failure")?;
                }
            }
        }
        Err(e) => {
            vprintln!("[{index}] {display}: fork failed: {e}");
            tap.result_with_reason(index, display, "fork failed")?;
        }
    }

    // `capture_file` unlinks itself on drop here, regardless of outcome.
    Ok(())
}

/// The child side of one test: redirect streams, arm the watchdog, run the
/// body against a fresh root custodian, shut it down, exit with its status.
/// Never returns.
fn run_child(capture: &std::fs::File, body: TestBody, watchdog_secs: u64) -> ! {
    let _ = unistd::dup2_stdout(capture);
    let _ = unistd::dup2_stderr(capture);
    // The two dup2 calls above leave the original capture-file descriptor
    // still open alongside its fd 1/fd 2 copies; close it so the child's fd
    // table matches the original's `dup2(...); dup2(...); close(tmpfd);`.
    let _ = unistd::close(capture.as_raw_fd());

    if watchdog_secs > 0 {
        // Expiry delivers SIGALRM with the default (terminating)
        // disposition; this child never installs a handler for it.
        unistd::alarm::set(watchdog_secs.min(u32::MAX as u64) as u32);
    }

    let alloc = AllocatorCapability::system();
    let mut custodian = Custodian::root(alloc);
    let status = body(&mut custodian);
    custodian.shutdown();
    std::process::exit(status);
}
