//! Result of a successful manager operation.

use std::fmt;

/// What a successful operation did to the kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The change was made.
    Applied,
    /// The desired state was already in place; nothing was changed.
    Skipped,
}

impl Outcome {
    /// Returns the outcome name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Skipped => "skipped",
        }
    }

    /// Returns true if nothing was changed.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
