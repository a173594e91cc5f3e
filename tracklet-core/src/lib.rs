//! tracklet-core: Core types for the tracklet track-fit emulator.
//!
//! This crate provides the fixed-width words used for bit-level
//! emulation, the detector and scale constants, the fit configuration and
//! the seed-candidate data model shared by the fit and merge stages.
//!

pub mod candidate;
pub mod config;
pub mod constants;
pub mod error;
pub mod matches;
pub mod word;

pub use candidate::{
    Candidate, DiskResidual, FitResult, FixedFit, FixedHelix, HelixParams, LayerResidual,
    SeedTopology,
};
pub use config::{DerivativeMode, FitConfig};
pub use error::{Error, Result, TableError};
pub use matches::{CandidateRef, FullMatchMemory};
pub use word::FixedWord;
