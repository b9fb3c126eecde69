//! Error taxonomy shared by every stage of an evaluation run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failure.
///
/// Lets callers tell "bad configuration" apart from "bad data" without
/// matching on every module's error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown metric, missing tracked metric, invalid settings
    Configuration,
    /// Artifact or report could not be read or written
    Io,
    /// A metric or a prediction could not be computed
    Computation,
    /// No winner could be chosen
    Selection,
}

impl ErrorKind {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Io => "io",
            Self::Computation => "computation",
            Self::Selection => "selection",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
