//! Hand-registered demonstration suite.
//!
//! Stands in for the external generator described as out of scope for the
//! core: a fixed five-test plan, wired up by hand rather than produced from
//! source-comment directives. A custodian exercise that cleans up early and
//! then still crashes, three additions, and one invalid memory access.

use anyhow::Result;
use tapdance_custodian::Custodian;
use tapdance_runner::{RunnerConfig, TestDescriptor, TestPlan};

unsafe fn cleaner(_handle: *mut ()) {
    println!("CLEANER CALLED");
}

/// Allocs on the root, defers a cleanup, creates a child scope, allocs on
/// the child, shuts the root down early inside the body itself, then
/// crashes anyway — showing that the deferred cleanup already ran exactly
/// once and that shutting a custodian down twice (once here, once by the
/// runner on return) is harmless.
fn custodian_exercise(c: &mut Custodian) -> i32 {
    c.alloc(100);
    c.defer(std::ptr::null_mut(), Some(cleaner));
    c.alloc(200);
    let c2 = c.child_create();
    c2.alloc(300);
    println!("SHOULD NOT SEE THIS");
    c2.alloc(20);
    c.alloc(50);
    println!("in-test cleaning:");
    c.shutdown();

    if 1 != 2 {
        eprintln!("assertion failed: 1 == 2");
        std::process::abort();
    }
    0
}

fn add_or_abort(x: i32, y: i32, expected: i32) -> i32 {
    if x + y != expected {
        eprintln!("assertion failed: {x} + {y} == {expected}");
        std::process::abort();
    }
    0
}

fn test_add_2_3_5(_c: &mut Custodian) -> i32 {
    add_or_abort(2, 3, 5)
}

fn test_segfault(_c: &mut Custodian) -> i32 {
    unsafe {
        let p = std::ptr::null_mut::<i32>();
        *p = 0;
    }
    0
}

fn test_add_2_3_6(_c: &mut Custodian) -> i32 {
    add_or_abort(2, 3, 6)
}

fn test_add_4_8_12(_c: &mut Custodian) -> i32 {
    add_or_abort(4, 8, 12)
}

fn main() -> Result<()> {
    tapdance_runner::diag::init();

    let mut plan = TestPlan::new();
    plan.push(TestDescriptor::new("test_program()", custodian_exercise));
    plan.push(TestDescriptor::new("test_add(2, 3, 5)", test_add_2_3_5));
    plan.push(TestDescriptor::new("test_segfault()", test_segfault));
    plan.push(TestDescriptor::new("test_add(2, 3, 6)", test_add_2_3_6));
    plan.push(TestDescriptor::new("test_add(4, 8, 12)", test_add_4_8_12));

    let config = RunnerConfig::load()?;
    let stdout = std::io::stdout();
    tapdance_runner::run_plan(&plan, &config, stdout.lock())?;
    Ok(())
}
