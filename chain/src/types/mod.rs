//! Core domain types shared across the verification pipeline (C3).
//!
//! Every block/transaction model exposes three projections, per §4.6:
//! [`AtRest`] (storage), [`BroadcastDto`] (the next level's ingress), and
//! [`SearchIndexEntry`] (secondary index population). Canonical hashing for
//! signing/PoW lives alongside each model rather than in a generic
//! serializer, because the wire format is a hand-specified field
//! concatenation (§4.1), not a derived serde encoding.

pub mod block;
pub mod claim;
pub mod registration;
pub mod tx;

pub use block::{Block, L1Block, L2Block, L3Block, L4Block, L5Block, Proof, ProofScheme};
pub use claim::{ClaimCheck, ClaimValidation, LevelRequirement};
pub use registration::Registration;
pub use tx::{StrippedTransaction, Transaction};

/// Views every typed record must expose for storage.
pub trait AtRest {
    type Dto: serde::Serialize + for<'de> serde::Deserialize<'de>;
    fn export_as_at_rest(&self) -> Self::Dto;
}

/// Views every typed block must expose for transmission to the next level.
pub trait BroadcastDto {
    type Dto: serde::Serialize + for<'de> serde::Deserialize<'de>;
    fn export_as_broadcast_dto(&self) -> Self::Dto;
}

/// Subset of a record's fields used to populate the secondary index.
pub trait SearchIndexEntry {
    type Entry: serde::Serialize;
    fn export_as_search_index(&self) -> Self::Entry;
}

/// `current_block_id = floor((now - EPOCH_OFFSET) / INTERVAL_SECS)`, per §4.7's
/// L1 tick, making L1 block ids time-addressable.
pub const L1_EPOCH_OFFSET_SECS: u64 = 1_432_238_220;
pub const L1_BLOCK_INTERVAL_SECS: u64 = 5;

pub fn l1_block_id_for_timestamp(now_unix_secs: u64) -> u64 {
    now_unix_secs
        .saturating_sub(L1_EPOCH_OFFSET_SECS)
        .div_euclid(L1_BLOCK_INTERVAL_SECS)
}
