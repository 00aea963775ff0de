//! Pipeline run identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one pipeline invocation in logs and events.
///
/// Backed by a UUIDv7, so runs started later compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The trailing eight hex digits, enough to tell concurrent runs apart.
    pub fn short(&self) -> String {
        let simple = self.0.simple().to_string();
        simple[simple.len() - 8..].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_runs_sort_after_earlier_ones() {
        let first = RunId::new();
        let second = RunId::new();
        assert!(first < second);
    }

    #[test]
    fn test_short_is_suffix_of_display() {
        let id = RunId::new();
        let short = id.short();
        assert_eq!(short.len(), 8);
        assert!(id.to_string().replace('-', "").ends_with(&short));
    }
}
