//! Match merge in front of the track fit.
//!
//! A fit unit receives the full matches of its sector on four streams, one
//! per match calculator group, each stream made of several memories. The
//! memories of a stream are merged into one TCID-ordered list; the four
//! lists are then walked in lockstep. A candidate that sits at the head of
//! two or more streams at the same time has been matched in at least two
//! places and is fitted.

use crate::fit::{FitOutcome, HitPattern, TrackFitter};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::str::FromStr;
use tracing::{debug, warn};
use tracklet_core::constants::TCID_BOUND;
use tracklet_core::{Candidate, CandidateRef, Error, FullMatchMemory, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of full-match streams of a fit unit.
pub const N_STREAMS: usize = 4;

/// Minimum number of streams a candidate must appear on to be fitted.
pub const MIN_REDUNDANCY: usize = 2;

/// Named input of a fit unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPort {
    /// `fullmatch{stream}in{slot}`.
    FullMatch {
        /// Stream number, 1..=4.
        stream: usize,
        /// Memory slot on the stream, from 1.
        slot: usize,
    },
    /// `tpar{n}in`: seed parameters of the sector.
    TrackletParameters(usize),
}

impl FromStr for InputPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wiring = || Error::Wiring(format!("unknown fit unit input: {s}"));

        if let Some(rest) = s.strip_prefix("fullmatch") {
            let (stream, slot) = rest.split_once("in").ok_or_else(wiring)?;
            let stream: usize = stream.parse().map_err(|_| wiring())?;
            let slot: usize = slot.parse().map_err(|_| wiring())?;
            if !(1..=N_STREAMS).contains(&stream) || slot == 0 {
                return Err(wiring());
            }
            return Ok(Self::FullMatch { stream, slot });
        }

        if let Some(n) = s.strip_prefix("tpar").and_then(|r| r.strip_suffix("in")) {
            let n: usize = n.parse().map_err(|_| wiring())?;
            if n == 0 {
                return Err(wiring());
            }
            return Ok(Self::TrackletParameters(n));
        }

        Err(wiring())
    }
}

/// Merges the memories of one stream into a single TCID-ordered list.
///
/// Every entry must belong to `sector`. Ties go to the earlier memory.
/// Entries with a TCID at or above `2^16` are never selected.
///
/// # Errors
/// Returns [`Error::InvalidCandidateRef`] for references outside `arena`
/// and [`Error::WrongSector`] for candidates of another sector.
pub fn ordered_matches(
    memories: &[FullMatchMemory],
    arena: &[Candidate],
    sector: u32,
) -> Result<Vec<CandidateRef>> {
    for memory in memories {
        if !memory.is_empty() {
            debug!(memory = %memory.name, matches = memory.len(), "ordered matches input");
        }
        for entry in &memory.entries {
            let candidate = arena
                .get(entry.index())
                .ok_or(Error::InvalidCandidateRef(entry.index()))?;
            if candidate.home_sector != sector {
                return Err(Error::WrongSector {
                    tcid: candidate.tcid,
                    expected: sector,
                    found: candidate.home_sector,
                });
            }
        }
    }

    let tcid = |r: CandidateRef| arena[r.index()].tcid;

    // Min-heap over the memory heads keyed by (tcid, memory).
    let mut heads: BinaryHeap<Reverse<(u32, usize)>> = memories
        .iter()
        .enumerate()
        .filter_map(|(m, memory)| memory.entries.first().map(|&r| Reverse((tcid(r), m))))
        .collect();
    let mut cursors = vec![0usize; memories.len()];
    let total: usize = memories.iter().map(FullMatchMemory::len).sum();
    let mut merged = Vec::with_capacity(total);

    while let Some(Reverse((best, m))) = heads.pop() {
        if best >= TCID_BOUND {
            break;
        }
        merged.push(memories[m].entries[cursors[m]]);
        cursors[m] += 1;
        if let Some(&next) = memories[m].entries.get(cursors[m]) {
            heads.push(Reverse((tcid(next), m)));
        }
    }

    for pair in merged.windows(2) {
        let (a, b) = (tcid(pair[0]), tcid(pair[1]));
        if a > b {
            warn!(sector, "wrong TCID ordering: {a} before {b}");
        }
    }

    Ok(merged)
}

/// Result of running one fit unit.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitReport {
    /// Fit unit name.
    pub unit: String,
    /// Fitted candidates in merge order.
    pub tracks: Vec<CandidateRef>,
    /// Candidates selected for the fit.
    pub selected: usize,
    /// Selected candidates without table entry.
    pub missing: usize,
    /// Hit patterns of the selected barrel-seeded candidates.
    pub hit_patterns: Vec<HitPattern>,
}

/// Fit unit of one sector: merge, select and fit.
#[derive(Debug, Clone, Default)]
pub struct FitTrackUnit {
    name: String,
    sector: u32,
    streams: [Vec<FullMatchMemory>; N_STREAMS],
    parameters: Vec<(usize, FullMatchMemory)>,
}

impl FitTrackUnit {
    /// Creates an unconnected fit unit.
    pub fn new(name: impl Into<String>, sector: u32) -> Self {
        Self {
            name: name.into(),
            sector,
            ..Self::default()
        }
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sector served by the unit.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// Memories connected to stream `stream` (0-based).
    pub fn stream(&self, stream: usize) -> &[FullMatchMemory] {
        self.streams.get(stream).map_or(&[], Vec::as_slice)
    }

    /// Number of connected seed-parameter memories.
    pub fn n_parameter_inputs(&self) -> usize {
        self.parameters.len()
    }

    /// Connects a memory to a named input.
    ///
    /// # Errors
    /// Returns [`Error::Wiring`] for an unknown input name.
    pub fn add_input(&mut self, port: &str, memory: FullMatchMemory) -> Result<()> {
        match port.parse::<InputPort>()? {
            InputPort::FullMatch { stream, .. } => self.streams[stream - 1].push(memory),
            InputPort::TrackletParameters(n) => self.parameters.push((n, memory)),
        }
        Ok(())
    }

    /// Merges the streams, fits every candidate with redundancy of at
    /// least two and reports the fitted ones in merge order.
    ///
    /// Fits of distinct candidates run in parallel.
    ///
    /// # Errors
    /// Returns an error if a stream is inconsistent with the arena or a
    /// fit violates an invariant.
    pub fn execute(&self, arena: &mut [Candidate], fitter: &TrackFitter) -> Result<UnitReport> {
        let selected = self.select(arena)?;

        let hit_patterns = if fitter.config().record_hit_patterns {
            selected
                .iter()
                .filter_map(|r| fitter.recorded_pattern(&arena[r.index()]))
                .collect()
        } else {
            Vec::new()
        };

        let mut wanted = vec![false; arena.len()];
        for r in &selected {
            wanted[r.index()] = true;
        }
        let outcomes: Vec<(usize, FitOutcome)> = arena
            .par_iter_mut()
            .enumerate()
            .filter(|(i, _)| wanted[*i])
            .map(|(i, candidate)| fitter.fit(candidate).map(|outcome| (i, outcome)))
            .collect::<Result<_>>()?;

        let mut fitted = vec![false; arena.len()];
        let mut missing = 0;
        for (i, outcome) in outcomes {
            match outcome {
                FitOutcome::Fitted => fitted[i] = true,
                FitOutcome::MissingDerivatives => missing += 1,
            }
        }

        let tracks = selected
            .iter()
            .copied()
            .filter(|r| fitted[r.index()])
            .collect();

        Ok(UnitReport {
            unit: self.name.clone(),
            tracks,
            selected: selected.len(),
            missing,
            hit_patterns,
        })
    }

    /// Walks the four merged streams and returns the candidates with
    /// redundancy of at least two, in merge order.
    fn select(&self, arena: &[Candidate]) -> Result<Vec<CandidateRef>> {
        let mut lists: [Vec<CandidateRef>; N_STREAMS] = Default::default();
        for (list, memories) in lists.iter_mut().zip(self.streams.iter()) {
            *list = ordered_matches(memories, arena, self.sector)?;
        }

        let mut cursors = [0usize; N_STREAMS];
        let mut selected = Vec::new();
        loop {
            let mut best: Option<CandidateRef> = None;
            for (list, &cursor) in lists.iter().zip(cursors.iter()) {
                if let Some(&head) = list.get(cursor) {
                    let better = best.map_or(true, |b| arena[head.index()].tcid < arena[b.index()].tcid);
                    if better {
                        best = Some(head);
                    }
                }
            }
            let Some(best) = best else {
                break;
            };

            let mut redundancy = 0;
            for (list, cursor) in lists.iter().zip(cursors.iter_mut()) {
                if list.get(*cursor) == Some(&best) {
                    *cursor += 1;
                    redundancy += 1;
                }
            }
            debug!(unit = %self.name, tcid = arena[best.index()].tcid, redundancy, "merged candidate");

            if redundancy >= MIN_REDUNDANCY {
                selected.push(best);
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklet_core::{FixedHelix, HelixParams, SeedTopology};

    fn arena(tcids: &[u32], sector: u32) -> Vec<Candidate> {
        let params = HelixParams::new(0.001, 0.1, 0.5, 1.0);
        let fixed = FixedHelix::digitize(&params).unwrap();
        tcids
            .iter()
            .map(|&tcid| {
                Candidate::new(tcid, sector, SeedTopology::Barrel { layer: 1 }, params, params, fixed)
            })
            .collect()
    }

    fn memory(name: &str, refs: &[usize]) -> FullMatchMemory {
        FullMatchMemory::with_entries(name, refs.iter().map(|&i| CandidateRef(i)).collect())
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(
            "fullmatch3in17".parse::<InputPort>().unwrap(),
            InputPort::FullMatch { stream: 3, slot: 17 }
        );
        assert_eq!(
            "tpar4in".parse::<InputPort>().unwrap(),
            InputPort::TrackletParameters(4)
        );
        assert!("fullmatch5in1".parse::<InputPort>().is_err());
        assert!("fullmatch1in0".parse::<InputPort>().is_err());
        assert!("fullmatch1".parse::<InputPort>().is_err());
        assert!("trackout".parse::<InputPort>().is_err());
    }

    #[test]
    fn test_ordered_matches_merges_by_tcid() {
        let arena = arena(&[3, 10, 5, 7, 1], 2);
        let memories = [memory("a", &[0, 3, 1]), memory("b", &[4, 2])];
        let merged = ordered_matches(&memories, &arena, 2).unwrap();
        let tcids: Vec<u32> = merged.iter().map(|r| arena[r.index()].tcid).collect();
        assert_eq!(tcids, vec![1, 3, 5, 7, 10]);
    }

    #[test]
    fn test_ordered_matches_ties_prefer_first_memory() {
        let arena = arena(&[4, 4], 0);
        let memories = [memory("a", &[1]), memory("b", &[0])];
        let merged = ordered_matches(&memories, &arena, 0).unwrap();
        assert_eq!(merged, vec![CandidateRef(1), CandidateRef(0)]);
    }

    #[test]
    fn test_ordered_matches_wrong_sector() {
        let mut arena = arena(&[1, 2], 0);
        arena[1].home_sector = 5;
        let err = ordered_matches(&[memory("a", &[0, 1])], &arena, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::WrongSector {
                tcid: 2,
                expected: 0,
                found: 5
            }
        ));
    }

    #[test]
    fn test_ordered_matches_invalid_reference() {
        let arena = arena(&[1], 0);
        let err = ordered_matches(&[memory("a", &[3])], &arena, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidCandidateRef(3)));
    }

    #[test]
    fn test_select_requires_two_streams() {
        let arena = arena(&[1, 2, 3, 4], 0);
        let mut unit = FitTrackUnit::new("FT_L1L2", 0);
        unit.add_input("fullmatch1in1", memory("m1", &[0, 1, 2])).unwrap();
        unit.add_input("fullmatch2in1", memory("m2", &[1, 3])).unwrap();
        unit.add_input("fullmatch3in2", memory("m3", &[1, 2])).unwrap();
        unit.add_input("fullmatch4in1", memory("m4", &[3])).unwrap();
        unit.add_input("tpar1in", memory("tpar", &[])).unwrap();
        assert!(unit.add_input("fullmatch9in1", memory("x", &[])).is_err());

        let selected = unit.select(&arena).unwrap();
        assert_eq!(selected, vec![CandidateRef(1), CandidateRef(2), CandidateRef(3)]);
        assert_eq!(unit.n_parameter_inputs(), 1);
    }

    #[test]
    fn test_same_tcid_distinct_candidates_are_not_merged() {
        // Equal TCIDs on two streams, but different candidates.
        let arena = arena(&[6, 6], 0);
        let mut unit = FitTrackUnit::new("FT", 0);
        unit.add_input("fullmatch1in1", memory("m1", &[0])).unwrap();
        unit.add_input("fullmatch2in1", memory("m2", &[1])).unwrap();
        assert!(unit.select(&arena).unwrap().is_empty());
    }
}
