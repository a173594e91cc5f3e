//! tracklet-algorithms: Track fit of the tracklet trigger emulation.
//!
//! This crate provides:
//! - **Derivatives** - linearized helix-fit coefficients for a hit pattern
//! - **Derivative table** - firmware lookup table of precomputed coefficients
//! - **Track fit** - single-step linear fit in floating and fixed point
//! - **Match merge** - TCID-ordered merge of the full-match streams
//!
#![warn(missing_docs)]

pub mod derivatives;
mod fit;
mod merge;
mod processing;
mod table;

pub use derivatives::{calculate_derivatives, gett, Derivatives, DiskGeometry};
pub use fit::{compress_chisq, rinv_index, FitOutcome, HitPattern, TrackFitter};
pub use merge::{
    ordered_matches, FitTrackUnit, InputPort, UnitReport, MIN_REDUNDANCY, N_STREAMS,
};
pub use processing::{process_event, process_events, Event, EventReport};
pub use table::{bin_rinv, DerivativeTable, TrackDer};

// Re-export core fit configuration
pub use tracklet_core::{DerivativeMode, FitConfig};
