//! The JWT-based token format.
//!
//! A standards-compliant signed token whose payload carries the
//! principal's claims verbatim plus `iat`, `exp`, `jti`, and a private
//! `typ` distinguishing the token kind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, encode, Header, Validation};
use serde::{Deserialize, Serialize};

use super::keyring::{KeyRing, SigningKey};
use super::{Principal, PrincipalBuilder, TokenKind};
use crate::error::{OAuthError, OAuthResult};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(default)]
    aud: Vec<String>,
    #[serde(default)]
    azp: Vec<String>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    scope: String,
    jti: String,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_challenge_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    host_properties: serde_json::Value,
    #[serde(default)]
    claims: HashMap<String, Vec<String>>,
}

fn kind_from_typ(typ: &str) -> OAuthResult<TokenKind> {
    match typ {
        "access_token" => Ok(TokenKind::AccessToken),
        "refresh_token" => Ok(TokenKind::RefreshToken),
        "id_token" => Ok(TokenKind::IdentityToken),
        "authorization_code" => Ok(TokenKind::AuthorizationCode),
        "device_code" => Ok(TokenKind::DeviceCode),
        "user_code" => Ok(TokenKind::UserCode),
        "state" => Ok(TokenKind::State),
        other => Err(OAuthError::invalid_token(format!("unrecognized token type '{other}'"))),
    }
}

fn timestamp(instant: DateTime<Utc>) -> i64 {
    instant.timestamp()
}

/// The JWT format, backed by a rotating signing key ring.
pub struct JwtFormat {
    keys: Arc<KeyRing<SigningKey>>,
}

impl JwtFormat {
    #[must_use]
    pub fn new(keys: Arc<KeyRing<SigningKey>>) -> Self {
        Self { keys }
    }

    pub fn encode(&self, principal: &Principal) -> OAuthResult<String> {
        let key = self.keys.current();
        let mut header = Header::new(key.algorithm);
        header.kid = Some(key.key_id.clone());

        let claims = Claims {
            sub: principal.subject.clone(),
            aud: principal.audiences.clone(),
            azp: principal.presenters.clone(),
            resources: principal.resources.clone(),
            scope: principal.scopes.join(" "),
            jti: principal.token_id.clone(),
            iat: timestamp(principal.created_at),
            exp: principal.expires_at.map(timestamp),
            typ: principal.token_type.as_str().to_string(),
            redirect_uri: principal.redirect_uri.clone(),
            code_challenge: principal.code_challenge.clone(),
            code_challenge_method: principal.code_challenge_method.clone(),
            authorization_id: principal.authorization_id.clone(),
            nonce: principal.nonce.clone(),
            host_properties: principal.host_properties.clone(),
            claims: principal.claims.clone(),
        };

        encode(&header, &claims, &key.encoding_key).map_err(|e| OAuthError::fault("jwt.encode", e.to_string()))
    }

    pub fn decode(&self, token: &str) -> OAuthResult<Principal> {
        let header = decode_header(token).map_err(|_| OAuthError::invalid_token("malformed JWT header"))?;
        let key_id = header.kid.as_deref().ok_or_else(|| OAuthError::invalid_token("JWT missing key id"))?;
        let key = self.keys.find(key_id).ok_or_else(|| OAuthError::invalid_token("unknown signing key"))?;

        let mut validation = Validation::new(key.algorithm);
        validation.validate_exp = true;
        validation.set_audience::<String>(&[]);
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &key.decoding_key, &validation)
            .map_err(|_| OAuthError::invalid_token("JWT signature or claims verification failed"))?;
        let claims = data.claims;

        let token_type = kind_from_typ(&claims.typ)?;
        let created_at = Utc.timestamp_opt(claims.iat, 0).single().unwrap_or_else(Utc::now);
        let expires_at = claims.exp.and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        let mut builder = PrincipalBuilder::new(token_type)
            .token_id(claims.jti)
            .audiences(claims.aud)
            .presenters(claims.azp)
            .resources(claims.resources)
            .scopes(claims.scope.split(' ').filter(|s| !s.is_empty()).map(String::from).collect());
        if let Some(sub) = claims.sub {
            builder = builder.subject(sub);
        }
        if let Some(expires_at) = expires_at {
            builder = builder.expires_at(expires_at);
        }
        if let Some(redirect_uri) = claims.redirect_uri {
            builder = builder.redirect_uri(redirect_uri);
        }
        if let (Some(challenge), Some(method)) = (claims.code_challenge, claims.code_challenge_method) {
            builder = builder.code_challenge(challenge, method);
        }
        if let Some(authorization_id) = claims.authorization_id {
            builder = builder.authorization_id(authorization_id);
        }
        if let Some(nonce) = claims.nonce {
            builder = builder.nonce(nonce);
        }
        for (name, values) in claims.claims {
            builder = builder.claim(name, values);
        }

        let mut principal = builder.build();
        principal.created_at = created_at;
        principal.host_properties = claims.host_properties;
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

    fn format() -> JwtFormat {
        let secret = b"test-signing-secret-at-least-32-bytes!!";
        let ring = KeyRing::new(SigningKey {
            key_id: "k1".into(),
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        });
        JwtFormat::new(Arc::new(ring))
    }

    #[test]
    fn round_trip_preserves_kind_and_claims() {
        let format = format();
        let principal = Principal::builder(TokenKind::AccessToken)
            .subject("user-1")
            .scopes(vec!["openid".into()])
            .expires_at(Utc::now() + chrono::Duration::minutes(5))
            .build();
        let token = format.encode(&principal).unwrap();
        let decoded = format.decode(&token).unwrap();
        assert_eq!(decoded.token_type, TokenKind::AccessToken);
        assert_eq!(decoded.subject, Some("user-1".to_string()));
    }

    #[test]
    fn unknown_key_id_is_rejected() {
        let format = format();
        let other = {
            let secret = b"another-signing-secret-at-least-32-bytes";
            let ring = KeyRing::new(SigningKey {
                key_id: "k2".into(),
                algorithm: Algorithm::HS256,
                encoding_key: EncodingKey::from_secret(secret),
                decoding_key: DecodingKey::from_secret(secret),
            });
            JwtFormat::new(Arc::new(ring))
        };
        let principal = Principal::builder(TokenKind::AccessToken).build();
        let token = other.encode(&principal).unwrap();
        assert!(format.decode(&token).is_err());
    }
}
