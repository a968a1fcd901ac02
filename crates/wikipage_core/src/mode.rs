use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Operation categories a page may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Content,
    Display,
    Edit,
    Remove,
    History,
    Diff,
    Lock,
    Unlock,
    Create,
    Block,
}

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Content,
        Mode::Display,
        Mode::Edit,
        Mode::Remove,
        Mode::History,
        Mode::Diff,
        Mode::Lock,
        Mode::Unlock,
        Mode::Create,
        Mode::Block,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Display => "display",
            Self::Edit => "edit",
            Self::Remove => "remove",
            Self::History => "history",
            Self::Diff => "diff",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Create => "create",
            Self::Block => "block",
        }
    }

    /// Modes that change stored state and are refused to crawlers.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Edit | Self::Remove)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "locking" => return Ok(Self::Lock),
            "unlocking" => return Ok(Self::Unlock),
            _ => {}
        }
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == lowered)
            .ok_or_else(|| format!("Unknown mode: {s}"))
    }
}
