//! Trigger status matching

use std::collections::HashSet;
use std::fmt;

/// Wildcard entry that matches every status code
pub const MATCH_ALL: &str = "*";

/// Status codes that make the dispatcher rotate to the next proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSet {
    All,
    Codes(HashSet<String>),
}

impl TriggerSet {
    /// Build from configured entries. Entries are trimmed here; an empty list means `{429}`.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut codes = HashSet::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry == MATCH_ALL {
                return Self::All;
            }
            if !entry.is_empty() {
                codes.insert(entry.to_string());
            }
        }

        if codes.is_empty() {
            return Self::default();
        }
        Self::Codes(codes)
    }

    pub fn matches(&self, code: u16) -> bool {
        match self {
            Self::All => true,
            Self::Codes(codes) => codes.contains(code.to_string().as_str()),
        }
    }

    /// Entries that can never equal a decimal status code
    pub fn unmatchable(&self) -> Vec<&str> {
        match self {
            Self::All => Vec::new(),
            Self::Codes(codes) => codes
                .iter()
                .filter(|c| !c.bytes().all(|b| b.is_ascii_digit()))
                .map(String::as_str)
                .collect(),
        }
    }
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::Codes(HashSet::from(["429".to_string()]))
    }
}

impl fmt::Display for TriggerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "{}", MATCH_ALL),
            Self::Codes(codes) => {
                let mut codes: Vec<_> = codes.iter().map(String::as_str).collect();
                codes.sort_unstable();
                write!(f, "{}", codes.join(","))
            }
        }
    }
}
