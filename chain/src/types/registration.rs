//! Matchmaking registration record (§4.4).

use serde::{Deserialize, Serialize};

use crate::crypto::{SupportedEncryption, SupportedHash};

/// A chain's published identity and reachability, as held by matchmaking
/// and cached by every peer that needs to verify its proofs or reach it
/// over HTTP.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registration {
    pub dc_id: String,
    pub level: u8,
    pub url: String,
    pub scheme: SupportedEncryption,
    pub hash: SupportedHash,
    /// SEC1-encoded public key, hex-encoded for transport/storage.
    pub public_key: String,
    pub version: String,
    /// Diversity fields used by L3 when scoring a claim's candidate set
    /// for `ddss` (§4.7: region/cloud spread increases diversity score).
    pub region: Option<String>,
    pub cloud: Option<String>,
    /// Only meaningful for L5 chains: an anchored public-chain wallet and
    /// whether it is presently funded (§4.4, "optionally public-chain
    /// wallet/funded flags for L5"). Absent for L1-L4.
    pub wallet: Option<String>,
    pub funded: Option<bool>,
}

impl Registration {
    /// Whether this registration carries enough L5 anchoring material to be
    /// selected as an L5 broadcast target.
    pub fn is_funded_l5(&self) -> bool {
        self.level == 5 && self.wallet.is_some() && self.funded.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Registration {
        Registration {
            dc_id: "chain-a".into(),
            level: 5,
            url: "https://chain-a.example".into(),
            scheme: SupportedEncryption::Secp256k1,
            hash: SupportedHash::Blake2b,
            public_key: "02abcd".into(),
            version: "1.0.0".into(),
            region: Some("us-west".into()),
            cloud: Some("aws".into()),
            wallet: Some("1L5WalletAddress".into()),
            funded: Some(true),
        }
    }

    #[test]
    fn l5_registration_is_funded_only_when_wallet_and_flag_both_present() {
        assert!(base().is_funded_l5());

        let mut no_wallet = base();
        no_wallet.wallet = None;
        assert!(!no_wallet.is_funded_l5());

        let mut unfunded = base();
        unfunded.funded = Some(false);
        assert!(!unfunded.is_funded_l5());

        let mut wrong_level = base();
        wrong_level.level = 3;
        assert!(!wrong_level.is_funded_l5());
    }
}
