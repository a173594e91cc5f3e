//! Error types for tracklet-core.

use thiserror::Error;

/// Result type alias for tracklet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tracklet operations.
///
/// Every variant is an invariant violation: the enclosing batch is
/// expected to stop. Expected misses (no table row, too little stream
/// redundancy) are not errors and never show up here.
#[derive(Error, Debug)]
pub enum Error {
    /// A value does not fit in the declared fixed-point word.
    #[error("value {value} does not fit in a {nbits}-bit word (signed: {signed})")]
    WordOverflow { value: i64, nbits: u32, signed: bool },

    /// Unsupported fixed-point word width.
    #[error("invalid word width: {0} bits")]
    InvalidWidth(u32),

    /// Candidate routed to a fit unit of another sector.
    #[error("candidate {tcid} belongs to sector {found}, fit unit serves sector {expected}")]
    WrongSector { tcid: u32, expected: u32, found: u32 },

    /// Residual outside the range the fit datapath accepts.
    #[error("candidate {tcid}: phi residual {value} out of range in {station}")]
    ResidualOutOfRange {
        tcid: u32,
        station: String,
        value: f64,
    },

    /// Reference to a candidate that does not exist in the event arena.
    #[error("candidate reference {0} is outside the event")]
    InvalidCandidateRef(usize),

    /// Port wiring error.
    #[error("wiring error: {0}")]
    Wiring(String),

    /// Derivative table construction error.
    #[error("derivative table error: {0}")]
    Table(#[from] TableError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Derivative table construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The (layer mask, disk mask) combination was already registered.
    #[error("duplicate entry: layermask={layer_mask:06b} diskmask={disk_mask:010b}")]
    DuplicateEntry { layer_mask: u32, disk_mask: u32 },

    /// Layer mask wider than six bits.
    #[error("layer mask {0} out of range")]
    LayerMaskOutOfRange(u32),

    /// Disk mask wider than ten bits.
    #[error("disk mask {0} out of range")]
    DiskMaskOutOfRange(u32),

    /// More alpha combinations than the alpha index can address.
    #[error("multiplicity {multiplicity} exceeds the maximum of {max}")]
    MultiplicityOutOfRange { multiplicity: u32, max: u32 },

    /// Dense layer or disk code space exhausted.
    #[error("dense {kind} code {code} exceeds {bits} bits")]
    CodeExhausted {
        kind: &'static str,
        code: usize,
        bits: u32,
    },

    /// Row address outside the table address space.
    #[error("table address {address} exceeds {bits} bits")]
    AddressOutOfRange { address: usize, bits: u32 },

    /// Hit pattern with more hits than the fit accepts.
    #[error("hit pattern has {0} hits, at most 6 are supported")]
    TooManyHits(usize),

    /// A fixed-point coefficient does not fit in the 16-bit datapath.
    #[error(
        "coefficient {value} out of range for layermask={layer_mask:06b} diskmask={disk_mask:010b}"
    )]
    CoefficientOverflow {
        layer_mask: u32,
        disk_mask: u32,
        value: i32,
    },

    /// No pattern was registered.
    #[error("derivative table is empty")]
    Empty,
}
