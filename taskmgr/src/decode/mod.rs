//! Tolerant decoders for the privileged source's wire formats.
//!
//! Text decoders never fail: a malformed record is dropped and counted, its siblings survive.
//! JSON decoders fail only when the payload is not a JSON object at all; individual fields
//! degrade to their "unknown" defaults.

mod detail;
mod roster;
mod snapshot;

pub use detail::{decode_deep_snapshot, decode_extended_info};
pub use roster::{decode_kill_candidates, decode_roster, RosterPayload};
pub use snapshot::{
    decode_cpu, decode_disk, decode_gpu, decode_memory, decode_mini, decode_net, decode_snapshot,
};

/// A decoded payload plus the number of records that were dropped on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub skipped: usize,
}
