//! L1-L5 block models and their canonical byte encodings (§3, §4.1).
//!
//! Canonical encoding builds a raw `Vec<u8>` rather than a `String`,
//! because L4's `valid` flag contributes a single 0x01/0x00 byte that has
//! no UTF-8 representation, and the `work` scheme appends a raw 8-byte
//! big-endian nonce. Every other field is the field's UTF-8 bytes,
//! concatenated in the exact order given in §3/§4.1; array fields are
//! concatenated element-by-element in insertion order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use super::{AtRest, BroadcastDto, SearchIndexEntry};
use crate::crypto::{
    CryptoError, SigningKey, SupportedHash, VerifyingKey, check_complexity, hash_bytes, search_pow,
    sign, verify,
};

/// Either a signature (`trust`) or a proof-of-work digest+nonce (`work`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Proof {
    Trust { signature: String },
    Work { digest: String, nonce: u64 },
}

impl Proof {
    pub fn scheme(&self) -> ProofScheme {
        match self {
            Proof::Trust { .. } => ProofScheme::Trust,
            Proof::Work { .. } => ProofScheme::Work,
        }
    }

    /// Base64 proof string, as carried by the block's `proof` field (§3).
    pub fn as_proof_string(&self) -> &str {
        match self {
            Proof::Trust { signature } => signature,
            Proof::Work { digest, .. } => digest,
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            Proof::Trust { .. } => None,
            Proof::Work { nonce, .. } => Some(*nonce),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofScheme {
    Trust,
    Work,
}

/// Produces a [`Proof`] for `message` bytes under `scheme`.
///
/// `message` must already exclude the nonce; under `work` this function
/// appends candidate nonces itself during the search (§4.1).
fn make_proof(
    scheme: ProofScheme,
    hash: SupportedHash,
    key: &SigningKey,
    complexity: u8,
    message: &[u8],
) -> Result<Proof, CryptoError> {
    match scheme {
        ProofScheme::Trust => {
            let digest = hash_bytes(hash, message);
            let digest32 = to_digest32(&digest)?;
            let sig = sign(key, &digest32)?;
            Ok(Proof::Trust { signature: BASE64.encode(sig) })
        }
        ProofScheme::Work => {
            let (digest, nonce) = search_pow(hash, complexity, |n| {
                let mut bytes = message.to_vec();
                bytes.extend_from_slice(&n.to_be_bytes());
                bytes
            });
            Ok(Proof::Work { digest: BASE64.encode(digest), nonce })
        }
    }
}

fn verify_proof(
    proof: &Proof,
    hash: SupportedHash,
    key: &VerifyingKey,
    complexity: u8,
    message: &[u8],
) -> Result<(), CryptoError> {
    match proof {
        Proof::Trust { signature } => {
            let digest = hash_bytes(hash, message);
            let digest32 = to_digest32(&digest)?;
            let sig = BASE64.decode(signature).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            verify(key, &digest32, &sig)
        }
        Proof::Work { digest, nonce } => {
            let expected = BASE64.decode(digest).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            let mut bytes = message.to_vec();
            bytes.extend_from_slice(&nonce.to_be_bytes());
            let actual = hash_bytes(hash, &bytes);
            if actual != expected || !check_complexity(&actual, complexity) {
                return Err(CryptoError::BadSignature);
            }
            Ok(())
        }
    }
}

fn to_digest32(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::MalformedKey(format!(
            "expected 32-byte digest, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

/// Common block attributes shared by every level (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockHeader {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
    pub prev_proof: String,
}

macro_rules! push_str {
    ($buf:expr, $($s:expr),+ $(,)?) => {
        $( $buf.extend_from_slice($s.as_bytes()); )+
    };
}

// ---------------------------------------------------------------------
// L1
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L1Block {
    pub header: BlockHeader,
    pub prev_id: String,
    pub stripped_transactions: Vec<String>,
    pub proof: Proof,
}

impl L1Block {
    /// Canonical message bytes, field order per the §8 golden vector:
    /// `dc_id, block_id, timestamp, prev_proof, prev_id, join(stripped_transactions)`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_str!(
            buf,
            self.header.dc_id,
            self.header.block_id.to_string(),
            self.header.timestamp,
            self.header.prev_proof,
            self.prev_id,
        );
        for txn in &self.stripped_transactions {
            buf.extend_from_slice(txn.as_bytes());
        }
        buf
    }

    pub fn apply_proof(
        &mut self,
        scheme: ProofScheme,
        hash: SupportedHash,
        key: &SigningKey,
        complexity: u8,
    ) -> Result<(), CryptoError> {
        let message = self.canonical_bytes();
        self.proof = make_proof(scheme, hash, key, complexity, &message)?;
        Ok(())
    }

    pub fn verify_proof(&self, hash: SupportedHash, key: &VerifyingKey, complexity: u8) -> Result<(), CryptoError> {
        verify_proof(&self.proof, hash, key, complexity, &self.canonical_bytes())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L1AtRestDto {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
    pub prev_proof: String,
    pub prev_id: String,
    pub stripped_transactions: Vec<String>,
    pub proof: String,
    pub scheme: ProofScheme,
    pub nonce: Option<u64>,
}

impl AtRest for L1Block {
    type Dto = L1AtRestDto;
    fn export_as_at_rest(&self) -> Self::Dto {
        L1AtRestDto {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
            prev_proof: self.header.prev_proof.clone(),
            prev_id: self.prev_id.clone(),
            stripped_transactions: self.stripped_transactions.clone(),
            proof: self.proof.as_proof_string().to_string(),
            scheme: self.proof.scheme(),
            nonce: self.proof.nonce(),
        }
    }
}

/// L1's broadcast DTO to L2 is the block itself (§4.9).
impl BroadcastDto for L1Block {
    type Dto = L1AtRestDto;
    fn export_as_broadcast_dto(&self) -> Self::Dto {
        self.export_as_at_rest()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct L1SearchIndexEntry {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
}

impl SearchIndexEntry for L1Block {
    type Entry = L1SearchIndexEntry;
    fn export_as_search_index(&self) -> Self::Entry {
        L1SearchIndexEntry {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
        }
    }
}

// ---------------------------------------------------------------------
// L2
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L2Block {
    pub header: BlockHeader,
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    /// Canonical JSON string of the `validations` map, stored verbatim so
    /// the original field ordering is recoverable across deserialisation
    /// (§4.6). Insertion order is preserved (§9 Open Question 1).
    pub validations_str: String,
    pub proof: Proof,
}

impl L2Block {
    /// Builds `validations_str` from an ordered list of `(txn_id, valid)`
    /// pairs, serialised as whitespace-free JSON (§4.1).
    pub fn build_validations_str(entries: &[(String, bool)]) -> String {
        let mut s = String::from("{");
        for (i, (txn_id, valid)) in entries.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            s.push('"');
            s.push_str(&escape_json_string(txn_id));
            s.push_str("\":");
            s.push_str(if *valid { "true" } else { "false" });
        }
        s.push('}');
        s
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_str!(
            buf,
            self.header.dc_id,
            self.header.block_id.to_string(),
            self.header.timestamp,
            self.header.prev_proof,
            self.l1_dc_id,
            self.l1_block_id.to_string(),
            self.l1_proof,
            self.validations_str,
        );
        buf
    }

    pub fn apply_proof(
        &mut self,
        scheme: ProofScheme,
        hash: SupportedHash,
        key: &SigningKey,
        complexity: u8,
    ) -> Result<(), CryptoError> {
        let message = self.canonical_bytes();
        self.proof = make_proof(scheme, hash, key, complexity, &message)?;
        Ok(())
    }

    pub fn verify_proof(&self, hash: SupportedHash, key: &VerifyingKey, complexity: u8) -> Result<(), CryptoError> {
        verify_proof(&self.proof, hash, key, complexity, &self.canonical_bytes())
    }
}

fn escape_json_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L2AtRestDto {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
    pub prev_proof: String,
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub validations_str: String,
    pub proof: String,
    pub scheme: ProofScheme,
    pub nonce: Option<u64>,
}

impl AtRest for L2Block {
    type Dto = L2AtRestDto;
    fn export_as_at_rest(&self) -> Self::Dto {
        L2AtRestDto {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
            prev_proof: self.header.prev_proof.clone(),
            l1_dc_id: self.l1_dc_id.clone(),
            l1_block_id: self.l1_block_id,
            l1_proof: self.l1_proof.clone(),
            validations_str: self.validations_str.clone(),
            proof: self.proof.as_proof_string().to_string(),
            scheme: self.proof.scheme(),
            nonce: self.proof.nonce(),
        }
    }
}

/// The L3 tick collects stored L2 receipts directly (§4.9), so L2's
/// broadcast DTO to L3 is the same shape as its at-rest form.
impl BroadcastDto for L2Block {
    type Dto = L2AtRestDto;
    fn export_as_broadcast_dto(&self) -> Self::Dto {
        self.export_as_at_rest()
    }
}

impl SearchIndexEntry for L2Block {
    type Entry = L1SearchIndexEntry;
    fn export_as_search_index(&self) -> Self::Entry {
        L1SearchIndexEntry {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
        }
    }
}

// ---------------------------------------------------------------------
// L3
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L2ProofRow {
    pub dc_id: String,
    pub block_id: u64,
    pub proof: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L3Block {
    pub header: BlockHeader,
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub l2_proofs: Vec<L2ProofRow>,
    pub ddss: f64,
    pub l2_count: u32,
    pub regions: Vec<String>,
    pub clouds: Vec<String>,
    pub proof: Proof,
}

impl L3Block {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_str!(
            buf,
            self.header.dc_id,
            self.header.block_id.to_string(),
            self.header.timestamp,
            self.header.prev_proof,
            self.l1_dc_id,
            self.l1_block_id.to_string(),
            self.l1_proof,
            self.ddss.to_string(),
            self.l2_count.to_string(),
        );
        for region in &self.regions {
            buf.extend_from_slice(region.as_bytes());
        }
        for cloud in &self.clouds {
            buf.extend_from_slice(cloud.as_bytes());
        }
        for row in &self.l2_proofs {
            push_str!(buf, row.dc_id, row.block_id.to_string(), row.proof);
        }
        buf
    }

    pub fn apply_proof(
        &mut self,
        scheme: ProofScheme,
        hash: SupportedHash,
        key: &SigningKey,
        complexity: u8,
    ) -> Result<(), CryptoError> {
        let message = self.canonical_bytes();
        self.proof = make_proof(scheme, hash, key, complexity, &message)?;
        Ok(())
    }

    pub fn verify_proof(&self, hash: SupportedHash, key: &VerifyingKey, complexity: u8) -> Result<(), CryptoError> {
        verify_proof(&self.proof, hash, key, complexity, &self.canonical_bytes())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L3AtRestDto {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
    pub prev_proof: String,
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub l2_proofs: Vec<L2ProofRow>,
    pub ddss: f64,
    pub l2_count: u32,
    pub regions: Vec<String>,
    pub clouds: Vec<String>,
    pub proof: String,
    pub scheme: ProofScheme,
    pub nonce: Option<u64>,
}

impl AtRest for L3Block {
    type Dto = L3AtRestDto;
    fn export_as_at_rest(&self) -> Self::Dto {
        L3AtRestDto {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
            prev_proof: self.header.prev_proof.clone(),
            l1_dc_id: self.l1_dc_id.clone(),
            l1_block_id: self.l1_block_id,
            l1_proof: self.l1_proof.clone(),
            l2_proofs: self.l2_proofs.clone(),
            ddss: self.ddss,
            l2_count: self.l2_count,
            regions: self.regions.clone(),
            clouds: self.clouds.clone(),
            proof: self.proof.as_proof_string().to_string(),
            scheme: self.proof.scheme(),
            nonce: self.proof.nonce(),
        }
    }
}

impl BroadcastDto for L3Block {
    type Dto = L3AtRestDto;
    fn export_as_broadcast_dto(&self) -> Self::Dto {
        self.export_as_at_rest()
    }
}

impl SearchIndexEntry for L3Block {
    type Entry = L1SearchIndexEntry;
    fn export_as_search_index(&self) -> Self::Entry {
        L1SearchIndexEntry {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
        }
    }
}

// ---------------------------------------------------------------------
// L4
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L4ValidationRow {
    pub l3_dc_id: String,
    pub l3_block_id: u64,
    pub l3_proof: String,
    pub valid: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L4Block {
    pub header: BlockHeader,
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub validations: Vec<L4ValidationRow>,
    pub proof: Proof,
}

impl L4Block {
    /// `valid` contributes a single 0x01/0x00 byte, not text (§4.1).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_str!(
            buf,
            self.header.dc_id,
            self.header.block_id.to_string(),
            self.header.timestamp,
            self.header.prev_proof,
            self.l1_dc_id,
            self.l1_block_id.to_string(),
            self.l1_proof,
        );
        for row in &self.validations {
            push_str!(buf, row.l3_dc_id, row.l3_block_id.to_string(), row.l3_proof);
            buf.push(if row.valid { 0x01 } else { 0x00 });
        }
        buf
    }

    pub fn apply_proof(
        &mut self,
        scheme: ProofScheme,
        hash: SupportedHash,
        key: &SigningKey,
        complexity: u8,
    ) -> Result<(), CryptoError> {
        let message = self.canonical_bytes();
        self.proof = make_proof(scheme, hash, key, complexity, &message)?;
        Ok(())
    }

    pub fn verify_proof(&self, hash: SupportedHash, key: &VerifyingKey, complexity: u8) -> Result<(), CryptoError> {
        verify_proof(&self.proof, hash, key, complexity, &self.canonical_bytes())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L4AtRestDto {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
    pub prev_proof: String,
    pub l1_dc_id: String,
    pub l1_block_id: u64,
    pub l1_proof: String,
    pub validations: Vec<L4ValidationRow>,
    pub proof: String,
    pub scheme: ProofScheme,
    pub nonce: Option<u64>,
}

impl AtRest for L4Block {
    type Dto = L4AtRestDto;
    fn export_as_at_rest(&self) -> Self::Dto {
        L4AtRestDto {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
            prev_proof: self.header.prev_proof.clone(),
            l1_dc_id: self.l1_dc_id.clone(),
            l1_block_id: self.l1_block_id,
            l1_proof: self.l1_proof.clone(),
            validations: self.validations.clone(),
            proof: self.proof.as_proof_string().to_string(),
            scheme: self.proof.scheme(),
            nonce: self.proof.nonce(),
        }
    }
}

impl BroadcastDto for L4Block {
    type Dto = L4AtRestDto;
    fn export_as_broadcast_dto(&self) -> Self::Dto {
        self.export_as_at_rest()
    }
}

impl SearchIndexEntry for L4Block {
    type Entry = L1SearchIndexEntry;
    fn export_as_search_index(&self) -> Self::Entry {
        L1SearchIndexEntry {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
        }
    }
}

// ---------------------------------------------------------------------
// L5
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L5Block {
    pub header: BlockHeader,
    /// Stringified references into L4 blocks this anchor bundles (§3).
    pub l4_blocks: Vec<String>,
    pub transaction_hash: Vec<String>,
    pub network: String,
    pub block_last_sent_at: String,
    pub proof: Proof,
}

impl L5Block {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        push_str!(
            buf,
            self.header.dc_id,
            self.header.block_id.to_string(),
            self.header.timestamp,
            self.header.prev_proof,
        );
        for block_ref in &self.l4_blocks {
            buf.extend_from_slice(block_ref.as_bytes());
        }
        buf
    }

    pub fn apply_proof(
        &mut self,
        scheme: ProofScheme,
        hash: SupportedHash,
        key: &SigningKey,
        complexity: u8,
    ) -> Result<(), CryptoError> {
        let message = self.canonical_bytes();
        self.proof = make_proof(scheme, hash, key, complexity, &message)?;
        Ok(())
    }

    pub fn verify_proof(&self, hash: SupportedHash, key: &VerifyingKey, complexity: u8) -> Result<(), CryptoError> {
        verify_proof(&self.proof, hash, key, complexity, &self.canonical_bytes())
    }

    /// Derives the set of L1 `dc_id`s this L5 block's `l4_blocks` entries
    /// attest to, scanning for the stringified `l1_dc_id` each entry
    /// carries (§4.8 receipt handler, step 2, L5 case).
    pub fn contributing_l1_ids(&self) -> Vec<String> {
        self.l4_blocks
            .iter()
            .filter_map(|entry| entry.split(':').next().map(str::to_string))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct L5AtRestDto {
    pub dc_id: String,
    pub block_id: u64,
    pub timestamp: String,
    pub prev_proof: String,
    pub l4_blocks: Vec<String>,
    pub transaction_hash: Vec<String>,
    pub network: String,
    pub block_last_sent_at: String,
    pub proof: String,
    pub scheme: ProofScheme,
    pub nonce: Option<u64>,
}

impl AtRest for L5Block {
    type Dto = L5AtRestDto;
    fn export_as_at_rest(&self) -> Self::Dto {
        L5AtRestDto {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
            prev_proof: self.header.prev_proof.clone(),
            l4_blocks: self.l4_blocks.clone(),
            transaction_hash: self.transaction_hash.clone(),
            network: self.network.clone(),
            block_last_sent_at: self.block_last_sent_at.clone(),
            proof: self.proof.as_proof_string().to_string(),
            scheme: self.proof.scheme(),
            nonce: self.proof.nonce(),
        }
    }
}

impl BroadcastDto for L5Block {
    type Dto = L5AtRestDto;
    fn export_as_broadcast_dto(&self) -> Self::Dto {
        self.export_as_at_rest()
    }
}

impl SearchIndexEntry for L5Block {
    type Entry = L1SearchIndexEntry;
    fn export_as_search_index(&self) -> Self::Entry {
        L1SearchIndexEntry {
            dc_id: self.header.dc_id.clone(),
            block_id: self.header.block_id,
            timestamp: self.header.timestamp.clone(),
        }
    }
}

/// Tags a block with its level, for code that needs to handle any of the
/// five variants uniformly (the broadcast processor's schedule, mostly).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Block {
    L1(L1Block),
    L2(L2Block),
    L3(L3Block),
    L4(L4Block),
    L5(L5Block),
}

impl Block {
    pub fn dc_id(&self) -> &str {
        match self {
            Block::L1(b) => &b.header.dc_id,
            Block::L2(b) => &b.header.dc_id,
            Block::L3(b) => &b.header.dc_id,
            Block::L4(b) => &b.header.dc_id,
            Block::L5(b) => &b.header.dc_id,
        }
    }

    pub fn block_id(&self) -> u64 {
        match self {
            Block::L1(b) => b.header.block_id,
            Block::L2(b) => b.header.block_id,
            Block::L3(b) => b.header.block_id,
            Block::L4(b) => b.header.block_id,
            Block::L5(b) => b.header.block_id,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Block::L1(_) => 1,
            Block::L2(_) => 2,
            Block::L3(_) => 3,
            Block::L4(_) => 4,
            Block::L5(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l1_fixture() -> L1Block {
        L1Block {
            header: BlockHeader {
                dc_id: "an id".into(),
                block_id: 8_474_745,
                timestamp: "129874".into(),
                prev_proof: "the previous block proof".into(),
            },
            prev_id: "previous block".into(),
            stripped_transactions: vec![
                "some".into(),
                "transactions".into(),
                "which".into(),
                "are".into(),
                "strings".into(),
            ],
            proof: Proof::Work { digest: String::new(), nonce: 0 },
        }
    }

    /// §8, property 5: fixed L1 block + blake2b + complexity 8 reproduces a
    /// known proof/nonce pair.
    #[test]
    fn l1_proof_of_work_matches_golden_vector() {
        let block = l1_fixture();
        let message = block.canonical_bytes();
        let (digest, nonce) = search_pow(SupportedHash::Blake2b, 8, |n| {
            let mut bytes = message.clone();
            bytes.extend_from_slice(&n.to_be_bytes());
            bytes
        });
        assert_eq!(BASE64.encode(&digest), "AByAk2FJJSyay0mb5jG6Zmtw08ZKN2M9TahZ95+6Ec0=");
        assert_eq!(nonce, 328);
    }

    #[test]
    fn l1_trust_proof_round_trips_sign_and_verify() {
        let key = SigningKey::generate();
        let mut block = l1_fixture();
        block.apply_proof(ProofScheme::Trust, SupportedHash::Sha256, &key, 0).unwrap();
        block.verify_proof(SupportedHash::Sha256, &key.public_key(), 0).unwrap();
    }

    #[test]
    fn l1_work_proof_fails_verification_if_block_mutated_after_the_fact() {
        let key = SigningKey::generate();
        let mut block = l1_fixture();
        block.apply_proof(ProofScheme::Work, SupportedHash::Sha256, &key, 4).unwrap();
        block.prev_id = "tampered".into();
        assert!(block.verify_proof(SupportedHash::Sha256, &key.public_key(), 4).is_err());
    }

    #[test]
    fn l2_validations_str_preserves_insertion_order() {
        let entries = vec![
            ("txn-b".to_string(), true),
            ("txn-a".to_string(), false),
        ];
        let s = L2Block::build_validations_str(&entries);
        assert_eq!(s, r#"{"txn-b":true,"txn-a":false}"#);
    }

    #[test]
    fn l4_boolean_valid_flag_changes_canonical_bytes() {
        let header = BlockHeader {
            dc_id: "l4-chain".into(),
            block_id: 1,
            timestamp: "1".into(),
            prev_proof: "prev".into(),
        };
        let mut valid_true = L4Block {
            header: header.clone(),
            l1_dc_id: "l1".into(),
            l1_block_id: 1,
            l1_proof: "proof".into(),
            validations: vec![L4ValidationRow {
                l3_dc_id: "l3-chain".into(),
                l3_block_id: 1,
                l3_proof: "l3proof".into(),
                valid: true,
            }],
            proof: Proof::Trust { signature: String::new() },
        };
        let mut valid_false = valid_true.clone();
        valid_false.validations[0].valid = false;
        valid_true.header = header;

        assert_ne!(valid_true.canonical_bytes(), valid_false.canonical_bytes());
    }
}
