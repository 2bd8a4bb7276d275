//! TAP v14 writer: plan line, per-test result line, diagnostic lines.

use std::io::{self, Write};

use crate::outcome::TestOutcome;

/// Writes the fixed-format TAP v14 stream to `out`. Nothing else may write
/// to the same stream while a `TapWriter` is in use — ordering between the
/// version/plan line, result lines, and diagnostics is the writer's only
/// contract.
pub struct TapWriter<W: Write> {
    out: W,
}

impl<W: Write> TapWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes `TAP version 14` followed by the plan line `1..N`.
    pub fn version_and_plan(&mut self, count: usize) -> io::Result<()> {
        writeln!(self.out, "TAP version 14")?;
        writeln!(self.out, "1..{count}")
    }

    /// Writes the single result line for test `index`, `ok` or `not ok`
    /// depending on `outcome`.
    pub fn result(&mut self, index: usize, display: &str, outcome: &TestOutcome) -> io::Result<()> {
        match outcome.reason() {
            None => writeln!(self.out, "ok {index} - {display}"),
            Some(reason) => writeln!(self.out, "not ok {index} - {display} ({reason})"),
        }
    }

    /// Writes a `not ok` line with a caller-supplied reason, for failures
    /// that precede classification entirely (capture-file setup, fork
    /// itself, or the wait call) and so never produce a [`TestOutcome`].
    pub fn result_with_reason(&mut self, index: usize, display: &str, reason: &str) -> io::Result<()> {
        writeln!(self.out, "not ok {index} - {display} ({reason})")
    }

    /// Access to the underlying writer, for the diagnostic replay step which
    /// writes prefixed raw bytes directly rather than through a line API.
    pub fn raw(&mut self) -> &mut W {
        &mut self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_and_plan_line_format() {
        let mut buf = Vec::new();
        TapWriter::new(&mut buf).version_and_plan(5).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "TAP version 14\n1..5\n");
    }

    #[test]
    fn passing_result_has_no_reason() {
        let mut buf = Vec::new();
        TapWriter::new(&mut buf)
            .result(2, "test_add(2, 3, 5)", &TestOutcome::Passed)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "ok 2 - test_add(2, 3, 5)\n");
    }

    #[test]
    fn failing_result_includes_parenthesized_reason() {
        let mut buf = Vec::new();
        TapWriter::new(&mut buf)
            .result(4, "test_add(2, 3, 6)", &TestOutcome::Signaled(6))
            .unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "not ok 4 - test_add(2, 3, 6) (killed by signal 6)\n"
        );
    }
}
