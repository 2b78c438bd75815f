//! rollcall-store — File-backed persistence for the attendance tool.
//!
//! Three stores, one file each: descriptors (binary, bincode), roster (CSV),
//! attendance log (CSV). All are read-modify-write with no locking; the tool
//! is single-user and single-process, and concurrent external writers are
//! out of scope. A store whose file does not exist yet loads as empty.

pub mod attendance;
pub mod descriptors;
pub mod roster;

pub use attendance::{AttendanceEntry, AttendanceLog, MarkOutcome};
pub use descriptors::DescriptorStore;
pub use roster::{PersonRecord, Roster};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("descriptor encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("descriptor decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}
