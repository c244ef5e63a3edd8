use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two backends the bridge can route to.
///
/// Both products register a native messaging host for the same extension, so
/// at most one of them is reliably reachable at a time; everything in the
/// router is keyed on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// The Claude Desktop application.
    Desktop,
    /// The Claude CLI agent.
    Cli,
}

impl Target {
    /// All targets, in declaration order. Handy for iteration in the
    /// detector and the status tooling.
    pub const ALL: [Target; 2] = [Target::Desktop, Target::Cli];
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Desktop => write!(f, "desktop"),
            Target::Cli => write!(f, "cli"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Target::Desktop),
            "cli" => Ok(Target::Cli),
            other => Err(format!("unknown target \"{other}\" (expected \"desktop\" or \"cli\")")),
        }
    }
}
