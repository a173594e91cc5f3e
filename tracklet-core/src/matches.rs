//! Full-match memories feeding the fit units.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index of a candidate in its event's candidate arena.
///
/// Two references are the same candidate exactly when the indices are
/// equal, independent of the candidates' TCIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CandidateRef(pub usize);

impl CandidateRef {
    /// Returns the arena index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Matches written by one match calculator for one fit-unit input.
///
/// Entries are expected in ascending TCID order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FullMatchMemory {
    /// Memory name, for diagnostics.
    pub name: String,
    /// Matched candidates.
    pub entries: Vec<CandidateRef>,
}

impl FullMatchMemory {
    /// Creates an empty memory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Creates a memory holding the given entries.
    pub fn with_entries(name: impl Into<String>, entries: Vec<CandidateRef>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    /// Adds a matched candidate.
    pub fn push(&mut self, candidate: CandidateRef) {
        self.entries.push(candidate);
    }

    /// Returns the number of matches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the memory holds no matches.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
