//! The opaque, "purpose-tagged" symmetric-encryption token format.
//!
//! The principal is serialized to a compact binary stream (version tag,
//! length-prefixed payload), sealed with AES-256-GCM under a key derived
//! via HKDF-SHA256 from the current master key and the request's
//! purpose vector, and the ciphertext is base64url-encoded behind the
//! `CfDJ8` prefix.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::aead::{self, Nonce, UnboundKey, AES_256_GCM};
use ring::error::Unspecified;
use ring::hkdf::{self, HKDF_SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use super::keyring::{KeyRing, MasterKey};
use super::purpose::PurposeVector;
use super::{Principal, OPAQUE_PREFIX};
use crate::error::{OAuthError, OAuthResult};

const NONCE_LEN: usize = 12;
const BINARY_FORMAT_VERSION: u8 = 1;

/// The opaque token format. Holds the master key ring and derives a
/// fresh AEAD key per (token kind, locality) purpose vector so a token
/// of one kind can never be decrypted as another.
pub struct OpaqueFormat {
    keys: Arc<KeyRing<MasterKey>>,
    rng: SystemRandom,
}

impl OpaqueFormat {
    #[must_use]
    pub fn new(keys: Arc<KeyRing<MasterKey>>) -> Self {
        Self {
            keys,
            rng: SystemRandom::new(),
        }
    }

    fn derive_key(secret: &[u8; 32], vector: &PurposeVector) -> Result<aead::LessSafeKey, Unspecified> {
        let salt = hkdf::Salt::new(HKDF_SHA256, b"oxide-oidc-opaque-v1");
        let prk = salt.extract(secret);
        let info = vector.info_bytes();
        let okm = prk.expand(&[&info], HKDF_SHA256)?;
        let mut key_bytes = [0u8; 32];
        okm.fill(&mut key_bytes)?;
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| Unspecified)?;
        Ok(aead::LessSafeKey::new(unbound))
    }

    fn seal(&self, plaintext: &[u8], vector: &PurposeVector) -> OAuthResult<Vec<u8>> {
        let master = self.keys.current();
        let key = Self::derive_key(&master.secret, vector)
            .map_err(|_| OAuthError::fault("opaque.derive_key", "key derivation failed"))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| OAuthError::fault("opaque.rng", "failed to generate nonce"))?;

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce_bytes), aead::Aad::from(master.key_id.as_bytes()), &mut in_out)
            .map_err(|_| OAuthError::fault("opaque.seal", "encryption failed"))?;

        let mut out = Vec::with_capacity(1 + master.key_id.len() + NONCE_LEN + in_out.len());
        out.push(master.key_id.len() as u8);
        out.extend_from_slice(master.key_id.as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn open(&self, sealed: &[u8], vector: &PurposeVector) -> OAuthResult<Vec<u8>> {
        if sealed.is_empty() {
            return Err(OAuthError::invalid_token("truncated opaque token"));
        }
        let key_id_len = sealed[0] as usize;
        let rest = &sealed[1..];
        if rest.len() < key_id_len + NONCE_LEN {
            return Err(OAuthError::invalid_token("truncated opaque token"));
        }
        let (key_id_bytes, rest) = rest.split_at(key_id_len);
        let key_id = std::str::from_utf8(key_id_bytes).map_err(|_| OAuthError::invalid_token("malformed key id"))?;
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let master = self
            .keys
            .find(key_id)
            .ok_or_else(|| OAuthError::invalid_token("unknown protection key"))?;
        let key = Self::derive_key(&master.secret, vector)
            .map_err(|_| OAuthError::invalid_token("key derivation failed"))?;

        let mut buf = ciphertext.to_vec();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let opened = key
            .open_in_place(Nonce::assume_unique_for_key(nonce), aead::Aad::from(key_id.as_bytes()), &mut buf)
            .map_err(|_| OAuthError::invalid_token("decryption failed"))?;
        Ok(opened.to_vec())
    }

    /// Serialize a principal to the compact binary stream (version tag,
    /// then a length-prefixed payload).
    fn serialize(principal: &Principal) -> Vec<u8> {
        let json = serde_json::to_vec(principal).expect("Principal always serializes");
        let mut buf = Vec::with_capacity(1 + 4 + json.len());
        buf.push(BINARY_FORMAT_VERSION);
        buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
        buf.extend_from_slice(&json);
        buf
    }

    fn deserialize(bytes: &[u8]) -> OAuthResult<Principal> {
        if bytes.len() < 5 || bytes[0] != BINARY_FORMAT_VERSION {
            return Err(OAuthError::invalid_token("unsupported opaque payload version"));
        }
        let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let json = bytes.get(5..5 + len).ok_or_else(|| OAuthError::invalid_token("truncated opaque payload"))?;
        serde_json::from_slice(json).map_err(|_| OAuthError::invalid_token("malformed opaque payload"))
    }

    /// Encrypt a principal's serialized payload under `vector`, returning
    /// the raw sealed bytes (used both for inline tokens and for the
    /// record payload stored behind a reference token).
    pub fn encode_payload(&self, principal: &Principal, vector: &PurposeVector) -> OAuthResult<Vec<u8>> {
        self.seal(&Self::serialize(principal), vector)
    }

    pub fn decode_payload(&self, sealed: &[u8], vector: &PurposeVector) -> OAuthResult<Principal> {
        let plaintext = self.open(sealed, vector)?;
        Self::deserialize(&plaintext)
    }

    /// Full `CfDJ8`-prefixed base64url token string for an inline token.
    pub fn encode_token(&self, principal: &Principal, vector: &PurposeVector) -> OAuthResult<String> {
        let sealed = self.encode_payload(principal, vector)?;
        Ok(format!("{OPAQUE_PREFIX}{}", URL_SAFE_NO_PAD.encode(sealed)))
    }

    pub fn decode_token(&self, token: &str, vector: &PurposeVector) -> OAuthResult<Principal> {
        let sealed = Self::strip_and_decode(token)?;
        self.decode_payload(&sealed, vector)
    }

    /// A reference token's plaintext is just the reference id string.
    pub fn encode_reference(&self, reference_id: &str, vector: &PurposeVector) -> OAuthResult<String> {
        let sealed = self.seal(reference_id.as_bytes(), vector)?;
        Ok(format!("{OPAQUE_PREFIX}{}", URL_SAFE_NO_PAD.encode(sealed)))
    }

    pub fn decode_reference(&self, token: &str, vector: &PurposeVector) -> OAuthResult<String> {
        let sealed = Self::strip_and_decode(token)?;
        let plaintext = self.open(&sealed, vector)?;
        String::from_utf8(plaintext).map_err(|_| OAuthError::invalid_token("malformed reference id"))
    }

    fn strip_and_decode(token: &str) -> OAuthResult<Vec<u8>> {
        let stripped = token
            .strip_prefix(OPAQUE_PREFIX)
            .ok_or_else(|| OAuthError::invalid_token("not an opaque-format token"))?;
        URL_SAFE_NO_PAD
            .decode(stripped)
            .map_err(|_| OAuthError::invalid_token("malformed opaque token encoding"))
    }
}
