//! Claim check: the matchmaking-owned verification assignment for one
//! block, and the per-level acceptance bookkeeping derived from it (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One verifier's recorded receipt for a claim, keyed by the verifier's
/// `dc_id` within a level's bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimValidation {
    pub block_id: String,
    pub signature: String,
}

/// The full set of level buckets a claim tracks, `level -> dc_id -> validation`.
pub type ClaimValidations = HashMap<u8, HashMap<String, ClaimValidation>>;

/// Matchmaking's assignment of which chains are responsible for verifying
/// a given L1 block at each level, and the receipts collected so far.
///
/// `numL2`..`numL5` are the counts matchmaking selected for each level;
/// a block is "still accepting verifications for level L" (§4.8's receipt
/// handler precondition) iff `validations[L].len() < num_l(level)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub block_id: String,
    pub num_l2: u32,
    pub num_l3: u32,
    pub num_l4: u32,
    pub num_l5: u32,
    pub validations: ClaimValidations,
    /// `level -> dc_id`s matchmaking offered the work to, so the broadcast
    /// processor knows who to send a level's bundle to without guessing
    /// from the (smaller) set who has actually responded so far.
    #[serde(default)]
    pub assignments: HashMap<u8, Vec<String>>,
}

/// The selection requirement matchmaking enforces when assigning chains to
/// a level's bucket for a new claim.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LevelRequirement {
    pub level: u8,
    pub count: u32,
}

impl ClaimCheck {
    /// The number of verifiers matchmaking selected for `level` (§3).
    pub fn required_count(&self, level: u8) -> u32 {
        match level {
            2 => self.num_l2,
            3 => self.num_l3,
            4 => self.num_l4,
            5 => self.num_l5,
            _ => 0,
        }
    }

    /// §4.8 receipt-handler precondition: is this block still open for
    /// verification receipts at `level`?
    pub fn is_accepting_verifications(&self, level: u8) -> bool {
        let recorded = self
            .validations
            .get(&level)
            .map(|bucket| bucket.len() as u32)
            .unwrap_or(0);
        recorded < self.required_count(level)
    }

    /// Whether `dc_id` is among the chains matchmaking assigned to verify
    /// this block at `level` — the other half of the receipt-acceptance
    /// invariant (§3): "C is in the claim for B at level L".
    ///
    /// Assignment itself isn't tracked as a separate field here; matchmaking
    /// is the source of truth for who was *offered* the work, and this
    /// bucket only tracks who has *responded*. Membership is therefore
    /// checked by the caller against the claim's offer list before calling
    /// [`record_validation`](Self::record_validation); this method only
    /// reports whether `dc_id` has already recorded a receipt.
    pub fn has_recorded(&self, level: u8, dc_id: &str) -> bool {
        self.validations
            .get(&level)
            .map(|bucket| bucket.contains_key(dc_id))
            .unwrap_or(false)
    }

    pub fn record_validation(&mut self, level: u8, dc_id: String, validation: ClaimValidation) {
        self.validations.entry(level).or_default().insert(dc_id, validation);
    }
}
