//! `--health` report lines. Passed checks go to stdout, every failure goes to stderr.

use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed(String),
    Failed(String),
}

impl CheckOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckOutcome::Failed(_))
    }

    pub fn write_to(&self, out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
        match self {
            CheckOutcome::Passed(line) => writeln!(out, "✅ {line}"),
            CheckOutcome::Failed(line) => writeln!(err, "❌ {line}"),
        }
    }

    /// Print to the process streams and report whether the check failed.
    pub fn report(&self) -> bool {
        // Nothing useful to do if the terminal is gone.
        let _ = self.write_to(&mut io::stdout().lock(), &mut io::stderr().lock());
        self.is_failure()
    }
}
