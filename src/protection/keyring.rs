//! Rotating key rings for JWT signing/encryption and opaque master keys.
//!
//! A small rotation cache applied to locally held key material rather
//! than a remote fetch: the "current" key signs/encrypts; retired keys
//! remain available for validating tokens minted before the last
//! rotation.

use std::sync::{Arc, RwLock};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

/// Any key with a stable identifier used to pick it out of the ring.
pub trait KeyMaterial {
    fn key_id(&self) -> &str;
}

/// A single JWT signing key pair.
pub struct SigningKey {
    pub key_id: String,
    pub algorithm: Algorithm,
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
}

impl KeyMaterial for SigningKey {
    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// A single opaque-format master key: raw bytes used as HKDF input key
/// material, never used directly as a cipher key.
pub struct MasterKey {
    pub key_id: String,
    pub secret: [u8; 32],
}

impl KeyMaterial for MasterKey {
    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Holds one "current" key (used for new protections) plus a list of
/// retired keys (kept only for validating previously issued tokens).
/// Rotation replaces the ring atomically.
pub struct KeyRing<K: KeyMaterial> {
    inner: RwLock<Inner<K>>,
}

struct Inner<K: KeyMaterial> {
    current: Arc<K>,
    retired: Vec<Arc<K>>,
}

impl<K: KeyMaterial> KeyRing<K> {
    #[must_use]
    pub fn new(current: K) -> Self {
        Self {
            inner: RwLock::new(Inner {
                current: Arc::new(current),
                retired: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<K> {
        self.inner.read().unwrap().current.clone()
    }

    /// Replace the current key, moving the previous current key into the
    /// retired list so in-flight tokens it signed remain valid.
    pub fn rotate(&self, new_current: K) {
        let mut inner = self.inner.write().unwrap();
        let old_current = std::mem::replace(&mut inner.current, Arc::new(new_current));
        inner.retired.push(old_current);
    }

    /// Find a key (current or retired) by id, for validation.
    #[must_use]
    pub fn find(&self, key_id: &str) -> Option<Arc<K>> {
        let inner = self.inner.read().unwrap();
        if inner.current.key_id() == key_id {
            return Some(inner.current.clone());
        }
        inner.retired.iter().find(|k| k.key_id() == key_id).cloned()
    }

    /// All keys, current first, for brute-force validation when the
    /// token carries no key id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<K>> {
        let inner = self.inner.read().unwrap();
        let mut all = vec![inner.current.clone()];
        all.extend(inner.retired.iter().cloned());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl KeyMaterial for &'static str {
        fn key_id(&self) -> &str {
            self
        }
    }

    #[test]
    fn rotation_keeps_old_key_for_validation() {
        let ring = KeyRing::new("key-1");
        ring.rotate("key-2");
        assert_eq!(ring.current().key_id(), "key-2");
        assert!(ring.find("key-1").is_some());
        assert!(ring.find("key-2").is_some());
        assert!(ring.find("key-3").is_none());
    }
}
