//! The audit report stream.
//!
//! Every resolve call produces exactly one line, whether or not the run is
//! report-only. Lines go to stdout in the CLI; tests collect them in a
//! `Vec<String>`.

use std::io::{self, Write};

/// A sink for audit lines.
pub trait Report {
    /// Emit one line. `line` carries no trailing newline.
    ///
    /// # Errors
    /// Returns the underlying write error.
    fn report(&mut self, line: &str) -> io::Result<()>;
}

impl Report for Vec<String> {
    fn report(&mut self, line: &str) -> io::Result<()> {
        self.push(line.to_owned());
        Ok(())
    }
}

impl<R: Report + ?Sized> Report for &mut R {
    fn report(&mut self, line: &str) -> io::Result<()> {
        (**self).report(line)
    }
}

/// Writes each line followed by `\n` and flushes, so a crash never leaves
/// a partial report buffered.
#[derive(Debug)]
pub struct LineReporter<W> {
    out: W,
    lines: u64,
}

impl<W: Write> LineReporter<W> {
    /// Report to `out`.
    #[must_use]
    pub const fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Number of lines written.
    #[must_use]
    pub const fn lines(&self) -> u64 {
        self.lines
    }

    /// Unwrap the writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Report for LineReporter<W> {
    fn report(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn line_reporter_terminates_each_line() {
        let mut r = LineReporter::new(Vec::new());
        r.report("a").unwrap();
        r.report("b c").unwrap();
        assert_eq!(r.lines(), 2);
        assert_eq!(String::from_utf8(r.into_inner()).unwrap(), "a\nb c\n");
    }

    #[test]
    fn vec_collects_lines() {
        let mut lines: Vec<String> = Vec::new();
        (&mut lines).report("x").unwrap();
        assert_eq!(lines, vec!["x"]);
    }
}
