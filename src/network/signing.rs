//! Structured-Data Signing
//!
//! EIP-712 style typed-data hashing of `GameState` and recoverable
//! secp256k1 signatures over the digest. Every digest is bound to a
//! domain (name, version, chain id, contract) so a signature can never be
//! replayed on another channel deployment or network.
//!
//! ```text
//! digest = keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash(GameState))
//! ```
//!
//! The advisory `timestamp` is not part of the struct hash; two replicas
//! that applied the same transitions at different wall-clock times agree
//! on the digest.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::address::Address;
use crate::core::hash::{keccak256, keccak256_concat, StateHash};
use crate::game::state::GameState;

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const GAME_STATE_TYPE: &str = "GameState(string gameId,string channelId,uint256 nonce,\
address currentTurn,uint256 moveCount,address player1,address player2,\
bytes32 player1ShipCommitment,bytes32 player2ShipCommitment,\
bytes32 player1MerkleRoot,bytes32 player2MerkleRoot,uint8 player1Hits,uint8 player2Hits,\
bool gameEnded,address winner,bytes32 lastMoveHash)";

/// Typed-data domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningDomain {
    /// Protocol name.
    pub name: String,
    /// Protocol version.
    pub version: String,
    /// Chain / network identifier.
    pub chain_id: u64,
    /// Arbiter contract address.
    pub verifying_contract: Address,
}

impl Default for SigningDomain {
    fn default() -> Self {
        Self {
            name: "BattleshipStateChannel".to_string(),
            version: "1".to_string(),
            chain_id: 31337,
            verifying_contract: Address::ZERO,
        }
    }
}

impl SigningDomain {
    /// Domain separator.
    pub fn separator(&self) -> StateHash {
        keccak256_concat(&[
            &keccak256(DOMAIN_TYPE.as_bytes()),
            &keccak256(self.name.as_bytes()),
            &keccak256(self.version.as_bytes()),
            &uint_word(self.chain_id),
            &self.verifying_contract.to_word(),
        ])
    }
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Struct hash of the signed `GameState` field tuple.
pub fn struct_hash(state: &GameState) -> StateHash {
    let winner = state.winner.unwrap_or(Address::ZERO);
    keccak256_concat(&[
        &keccak256(GAME_STATE_TYPE.as_bytes()),
        &keccak256(state.game_id.as_bytes()),
        &keccak256(state.channel_id.as_bytes()),
        &uint_word(state.nonce),
        &state.current_turn.to_word(),
        &uint_word(state.move_count),
        &state.player1.to_word(),
        &state.player2.to_word(),
        &state.player1_ship_commitment,
        &state.player2_ship_commitment,
        &state.player1_merkle_root,
        &state.player2_merkle_root,
        &uint_word(state.player1_hits as u64),
        &uint_word(state.player2_hits as u64),
        &uint_word(state.game_ended as u64),
        &winner.to_word(),
        &state.last_move_hash,
    ])
}

/// Digest that is actually signed.
pub fn typed_data_hash(domain: &SigningDomain, state: &GameState) -> StateHash {
    keccak256_concat(&[&[0x19u8, 0x01][..], &domain.separator(), &struct_hash(state)])
}

// =============================================================================
// SIGNATURES
// =============================================================================

/// 65-byte `r ‖ s ‖ v` signature, `v ∈ {27, 28}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateSignature(pub [u8; 65]);

impl StateSignature {
    fn parts(&self) -> Result<(Signature, RecoveryId), SigningError> {
        let signature = Signature::from_slice(&self.0[..64])
            .map_err(|_| SigningError::MalformedSignature { reason: "invalid r/s".into() })?;
        let v = self.0[64];
        let recid = RecoveryId::from_byte(v.wrapping_sub(27))
            .or_else(|| RecoveryId::from_byte(v))
            .ok_or_else(|| SigningError::MalformedSignature {
                reason: format!("invalid recovery byte {}", v),
            })?;
        Ok((signature, recid))
    }

    /// Recover the address that signed `digest`.
    pub fn recover(&self, digest: &StateHash) -> Result<Address, SigningError> {
        let (signature, recid) = self.parts()?;
        let key = VerifyingKey::recover_from_prehash(digest, &signature, recid)
            .map_err(|_| SigningError::RecoveryFailed)?;
        Ok(Address::from_verifying_key(&key))
    }

    /// `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for StateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateSignature(0x{}..)", hex::encode(&self.0[..6]))
    }
}

impl Serialize for StateSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StateSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(raw).map_err(serde::de::Error::custom)?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 65 bytes"))?;
        Ok(Self(array))
    }
}

/// Signing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// Secret key bytes rejected.
    #[error("invalid signing key")]
    InvalidKey,

    /// Signature bytes do not parse.
    #[error("malformed signature: {reason}")]
    MalformedSignature {
        /// What was wrong.
        reason: String,
    },

    /// No public key recovers from this signature and digest.
    #[error("signer recovery failed")]
    RecoveryFailed,

    /// The signer backend refused.
    #[error("signing failed: {reason}")]
    SigningFailed {
        /// Backend message.
        reason: String,
    },
}

/// Something that can sign state digests on behalf of one participant.
pub trait StateSigner: Send + Sync {
    /// Address the signatures recover to.
    fn address(&self) -> Address;

    /// Sign a 32-byte typed-data digest.
    fn sign_digest(&self, digest: &StateHash) -> Result<StateSignature, SigningError>;
}

/// In-process secp256k1 key.
#[derive(Clone)]
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    /// Fresh random key.
    pub fn random() -> Self {
        Self::from_key(SigningKey::random(&mut OsRng))
    }

    /// Key from 32 secret bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self, SigningError> {
        let key = SigningKey::from_slice(secret).map_err(|_| SigningError::InvalidKey)?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let address = Address::from_verifying_key(key.verifying_key());
        Self { key, address }
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalSigner({})", self.address)
    }
}

impl StateSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_digest(&self, digest: &StateHash) -> Result<StateSignature, SigningError> {
        let (signature, recid) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SigningError::SigningFailed { reason: e.to_string() })?;
        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = 27 + recid.to_byte();
        Ok(StateSignature(bytes))
    }
}

/// Result of checking a signature. Never an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureCheck {
    /// Recovered signer equals the expected one.
    pub is_valid: bool,
    /// Address recovered, if recovery succeeded.
    pub recovered_signer: Option<Address>,
    /// Why the check failed.
    pub error: Option<String>,
}

/// Recover the signer of `state` and compare it to `expected_signer`.
///
/// Addresses compare as bytes, so hex case in configuration is irrelevant.
pub fn verify_state_signature(
    domain: &SigningDomain,
    signature: &StateSignature,
    expected_signer: &Address,
    state: &GameState,
) -> SignatureCheck {
    let digest = typed_data_hash(domain, state);
    match signature.recover(&digest) {
        Ok(recovered) if recovered == *expected_signer => SignatureCheck {
            is_valid: true,
            recovered_signer: Some(recovered),
            error: None,
        },
        Ok(recovered) => SignatureCheck {
            is_valid: false,
            recovered_signer: Some(recovered),
            error: Some(format!("signed by {}, expected {}", recovered, expected_signer)),
        },
        Err(e) => SignatureCheck {
            is_valid: false,
            recovered_signer: None,
            error: Some(e.to_string()),
        },
    }
}
