//! Event-level driver: run every fit unit of an event.

use crate::fit::{HitPattern, TrackFitter};
use crate::merge::{FitTrackUnit, UnitReport};
use rayon::prelude::*;
use tracing::info;
use tracklet_core::{Candidate, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Candidates of one event and the fit units reading them.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Candidate arena; memories refer to candidates by index.
    pub candidates: Vec<Candidate>,
    /// Fit units, run in order.
    pub units: Vec<FitTrackUnit>,
}

impl Event {
    /// Creates an event.
    pub fn new(candidates: Vec<Candidate>, units: Vec<FitTrackUnit>) -> Self {
        Self { candidates, units }
    }
}

/// Results of one event.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventReport {
    /// One report per fit unit.
    pub units: Vec<UnitReport>,
}

impl EventReport {
    /// Total number of fitted tracks.
    pub fn n_tracks(&self) -> usize {
        self.units.iter().map(|u| u.tracks.len()).sum()
    }

    /// Total number of table misses.
    pub fn n_missing(&self) -> usize {
        self.units.iter().map(|u| u.missing).sum()
    }

    /// Recorded hit patterns, unit by unit.
    pub fn hit_patterns(&self) -> impl Iterator<Item = &HitPattern> {
        self.units.iter().flat_map(|u| u.hit_patterns.iter())
    }
}

/// Runs all fit units of an event on its candidate arena.
///
/// # Errors
/// Stops at the first unit that reports an invariant violation.
pub fn process_event(event: &mut Event, fitter: &TrackFitter) -> Result<EventReport> {
    let mut units = Vec::with_capacity(event.units.len());
    for unit in &event.units {
        units.push(unit.execute(&mut event.candidates, fitter)?);
    }
    Ok(EventReport { units })
}

/// Processes events in parallel; each event owns its arena.
///
/// # Errors
/// Returns the first invariant violation of any event.
pub fn process_events(events: &mut [Event], fitter: &TrackFitter) -> Result<Vec<EventReport>> {
    let reports: Vec<EventReport> = events
        .par_iter_mut()
        .map(|event| process_event(event, fitter))
        .collect::<Result<_>>()?;

    let tracks: usize = reports.iter().map(EventReport::n_tracks).sum();
    let missing: usize = reports.iter().map(EventReport::n_missing).sum();
    info!(events = events.len(), tracks, missing, "processed events");
    Ok(reports)
}
