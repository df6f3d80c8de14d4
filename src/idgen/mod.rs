//! Time-ordered 64-bit id allocation
//!
//! Ids are laid out high to low as 41 bits of milliseconds since a custom
//! epoch, 10 bits of machine id and 12 bits of per-millisecond sequence.
//! One [`IdAllocator`] exists per logical shard and is handed to callers
//! explicitly; there is no process-wide instance.

pub mod allocator;
pub mod clock;

pub use allocator::{decompose, IdAllocator, IdParts};
pub use clock::{Clock, ManualClock, SystemClock};

pub const TIMESTAMP_BITS: u32 = 41;
pub const MACHINE_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

pub const MAX_TIMESTAMP: i64 = (1 << TIMESTAMP_BITS) - 1;
pub const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

pub const MACHINE_SHIFT: u32 = SEQUENCE_BITS;
pub const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_ID_BITS;
