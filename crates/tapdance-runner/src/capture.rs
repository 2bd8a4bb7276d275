//! Capture-file creation and the diagnostic-replay algorithm.
//!
//! The replay algorithm below is a direct port of the original `fgets`-based
//! loop: a fixed 1024-byte read buffer, a `#: ` prefix on every logical line
//! of a failed test's captured output, and a synthesized trailing newline
//! when the capture doesn't end in one. A line that fills the whole buffer
//! without a newline is a partial line, not a fresh one — its continuation
//! is never re-prefixed, only the next genuinely new line is.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

const BUFLEN: usize = 1024;

/// Creates a unique capture file for test `index` inside `dir`, named in the
/// spirit of the original `tap_test_<i>` scratch files.
pub fn create(dir: &Path, index: usize) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix("tap_test_")
        .suffix(&format!("_{index}"))
        .tempfile_in(dir)
        .with_context(|| format!("failed to create capture file in {}", dir.display()))
}

/// Rewinds `file` and streams its contents to `out`, applying the
/// diagnostic-prefixing algorithm. Used only for tests that did not pass.
pub fn replay_as_diagnostics<W: Write>(file: &mut File, out: &mut W) -> io::Result<()> {
    use std::io::Seek;
    file.seek(io::SeekFrom::Start(0))?;
    write_diagnostics(file, out)
}

fn write_diagnostics<R: Read, W: Write>(mut reader: R, out: &mut W) -> io::Result<()> {
    let mut buf = [0u8; BUFLEN];
    let mut fresh_line = true;

    loop {
        let mut len = 0usize;
        let mut one = [0u8; 1];
        while len < BUFLEN - 1 {
            let n = reader.read(&mut one)?;
            if n == 0 {
                break;
            }
            buf[len] = one[0];
            len += 1;
            if one[0] == b'\n' {
                break;
            }
        }

        if len == 0 {
            break;
        }

        if fresh_line {
            out.write_all(b"#: ")?;
            fresh_line = false;
        }
        out.write_all(&buf[..len])?;

        if buf[len - 1] == b'\n' {
            fresh_line = true;
        } else if len < BUFLEN - 1 {
            out.write_all(b"\n")?;
            fresh_line = true;
        }
        // else: buffer filled mid-line; the next read continues the same
        // logical line, so no prefix and no synthesized newline here.
    }

    Ok(())
}
