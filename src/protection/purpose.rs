//! Purpose vectors
//!
//! The ordered tuple of short strings that uniquely determines the
//! symmetric key derived for the opaque token format. Distinct vectors guarantee a token of one
//! kind can never be decrypted as another.

use super::TokenKind;

/// Whether the ciphertext is stored inline in the token string or held
/// by the store and looked up via a short reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Inline,
    Reference,
}

impl Locality {
    fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Reference => "reference",
        }
    }
}

/// An ordered tuple of (role, token kind, reference-or-inline) feeding
/// the key-derivation function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PurposeVector(Vec<String>);

impl PurposeVector {
    #[must_use]
    pub fn new(role: &str, kind: TokenKind, locality: Locality) -> Self {
        Self(vec![
            "oxide-oidc".to_string(),
            role.to_string(),
            kind.as_str().to_string(),
            locality.as_str().to_string(),
        ])
    }

    /// Bytes fed into the key-derivation function. The join separator is
    /// not present in any component (role/kind/locality are all
    /// restricted to `[a-z_]+`), so distinct vectors never collide.
    #[must_use]
    pub fn info_bytes(&self) -> Vec<u8> {
        self.0.join("\u{1}").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_kinds_yield_distinct_vectors() {
        let access = PurposeVector::new("server", TokenKind::AccessToken, Locality::Inline);
        let refresh = PurposeVector::new("server", TokenKind::RefreshToken, Locality::Inline);
        assert_ne!(access.info_bytes(), refresh.info_bytes());
    }

    #[test]
    fn distinct_locality_yields_distinct_vectors() {
        let inline = PurposeVector::new("server", TokenKind::AccessToken, Locality::Inline);
        let reference = PurposeVector::new("server", TokenKind::AccessToken, Locality::Reference);
        assert_ne!(inline.info_bytes(), reference.info_bytes());
    }
}
