//! Parameter model
//!
//! Typed, variant-valued request/response parameters with JSON and
//! form-urlencoded round-trip.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A tagged variant over the shapes an OAuth/OIDC parameter can take.
///
/// Carries its exact variant across serialization: a `String` round-trips
/// as a JSON string, a `StringList` as a JSON array, etc.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    String(String),
    StringList(Vec<String>),
    Integer(i64),
    Boolean(bool),
    Json(Json),
}

impl Parameter {
    /// Best-effort string view, used by named accessors that expect a
    /// single-valued parameter.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::StringList(list) => list.first().map(String::as_str),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            Self::StringList(list) => Some(list.clone()),
            Self::String(s) => Some(s.split(' ').filter(|p| !p.is_empty()).map(String::from).collect()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// True for values that are "null-ish" and should cause `Message::set`
    /// to remove the key instead of storing it.
    fn is_absent(&self) -> bool {
        matches!(self, Self::String(s) if s.is_empty())
            || matches!(self, Self::StringList(list) if list.is_empty())
            || matches!(self, Self::Json(Json::Null))
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for Parameter {
    fn from(value: Vec<String>) -> Self {
        Self::StringList(value)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl Serialize for Parameter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::StringList(list) => list.serialize(serializer),
            Self::Integer(n) => serializer.serialize_i64(*n),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Json(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Json::deserialize(deserializer)?;
        Ok(Self::from_json(value))
    }
}

impl Parameter {
    /// Deserialization is lenient: any JSON shape maps onto a variant,
    /// falling back to `Json` for objects and nested arrays.
    #[must_use]
    pub fn from_json(value: Json) -> Self {
        match value {
            Json::String(s) => Self::String(s),
            Json::Bool(b) => Self::Boolean(b),
            Json::Number(n) => n.as_i64().map(Self::Integer).unwrap_or(Self::Json(Json::Number(n))),
            Json::Array(items) => {
                let mut strings = Vec::with_capacity(items.len());
                let mut all_strings = true;
                for item in &items {
                    match item {
                        Json::String(s) => strings.push(s.clone()),
                        _ => {
                            all_strings = false;
                            break;
                        }
                    }
                }
                if all_strings {
                    Self::StringList(strings)
                } else {
                    Self::Json(Json::Array(items))
                }
            }
            Json::Null => Self::Json(Json::Null),
            other => Self::Json(other),
        }
    }

    /// Render to the JSON value that would be written out for this
    /// parameter.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::String(s) => Json::String(s.clone()),
            Self::StringList(list) => Json::Array(list.iter().cloned().map(Json::String).collect()),
            Self::Integer(n) => Json::Number((*n).into()),
            Self::Boolean(b) => Json::Bool(*b),
            Self::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::StringList(list) => write!(f, "{}", list.join(" ")),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered mapping from parameter name to [`Parameter`]. `Request` and
/// `Response` are newtype views over the same storage that expose
/// well-known named accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    // BTreeMap keeps serialization order stable for tests and logs; the
    // wire format does not require insertion order.
    entries: BTreeMap<String, Parameter>,
}

impl Message {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys are non-empty; empty keys are ignored.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Parameter>) {
        let name = name.into();
        if name.is_empty() {
            return;
        }
        let value = value.into();
        if value.is_absent() {
            self.entries.remove(&name);
        } else {
            self.entries.insert(name, value);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(Parameter::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize to a JSON document.
    #[must_use]
    pub fn write_json(&self) -> Json {
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Json::Object(map)
    }

    /// Parse a JSON document. Unknown keys are preserved verbatim.
    #[must_use]
    pub fn read_json(value: Json) -> Self {
        let mut message = Self::new();
        if let Json::Object(map) = value {
            for (key, value) in map {
                message.entries.insert(key, Parameter::from_json(value));
            }
        }
        message
    }

    /// Parse `application/x-www-form-urlencoded` or query-string bytes.
    /// Duplicate keys are merged into a string list.
    #[must_use]
    pub fn read_form(body: &str) -> Self {
        let mut message = Self::new();
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            let key = key.into_owned();
            let value = value.into_owned();
            if key.is_empty() {
                continue;
            }
            match message.entries.remove(&key) {
                None => message.entries.insert(key, Parameter::String(value)),
                Some(Parameter::String(existing)) => {
                    message.entries.insert(key, Parameter::StringList(vec![existing, value]))
                }
                Some(Parameter::StringList(mut existing)) => {
                    existing.push(value);
                    message.entries.insert(key, Parameter::StringList(existing))
                }
                Some(other) => message.entries.insert(key, other),
            };
        }
        message
    }
}

macro_rules! named_accessor {
    ($get:ident, $set:ident, $name:literal) => {
        #[must_use]
        pub fn $get(&self) -> Option<&str> {
            self.0.get_str($name)
        }

        pub fn $set(&mut self, value: impl Into<Parameter>) {
            self.0.set($name, value);
        }
    };
}

/// A request `Message`, with named accessors for the well-known OAuth/
/// OIDC request fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request(pub Message);

impl Request {
    named_accessor!(grant_type, set_grant_type, "grant_type");
    named_accessor!(code, set_code, "code");
    named_accessor!(redirect_uri, set_redirect_uri, "redirect_uri");
    named_accessor!(scope, set_scope, "scope");
    named_accessor!(state, set_state, "state");
    named_accessor!(code_verifier, set_code_verifier, "code_verifier");
    named_accessor!(code_challenge, set_code_challenge, "code_challenge");
    named_accessor!(code_challenge_method, set_code_challenge_method, "code_challenge_method");
    named_accessor!(client_id, set_client_id, "client_id");
    named_accessor!(client_secret, set_client_secret, "client_secret");
    named_accessor!(refresh_token, set_refresh_token, "refresh_token");
    named_accessor!(username, set_username, "username");
    named_accessor!(password, set_password, "password");
    named_accessor!(token, set_token, "token");
    named_accessor!(token_type_hint, set_token_type_hint, "token_type_hint");
    named_accessor!(device_code, set_device_code, "device_code");
    named_accessor!(user_code, set_user_code, "user_code");
    named_accessor!(post_logout_redirect_uri, set_post_logout_redirect_uri, "post_logout_redirect_uri");
}

/// A response `Message`, with named accessors for the well-known OAuth/
/// OIDC response fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response(pub Message);

impl Response {
    named_accessor!(access_token, set_access_token, "access_token");
    named_accessor!(refresh_token, set_refresh_token, "refresh_token");
    named_accessor!(id_token, set_id_token, "id_token");
    named_accessor!(token_type, set_token_type, "token_type");
    named_accessor!(scope, set_scope, "scope");
    named_accessor!(state, set_state, "state");
    named_accessor!(error, set_error, "error");
    named_accessor!(error_description, set_error_description, "error_description");
    named_accessor!(error_uri, set_error_uri, "error_uri");
    named_accessor!(iss, set_iss, "iss");

    #[must_use]
    pub fn expires_in(&self) -> Option<i64> {
        self.0.get("expires_in").and_then(Parameter::as_i64)
    }

    pub fn set_expires_in(&mut self, seconds: i64) {
        self.0.set("expires_in", seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_variant() {
        let mut message = Message::new();
        message.set("scope", vec!["a".to_string(), "b".to_string()]);
        message.set("max_age", 600_i64);
        message.set("trusted", true);
        let json = message.write_json();
        let restored = Message::read_json(json);
        assert_eq!(message, restored);
    }

    #[test]
    fn setting_empty_string_removes_key() {
        let mut message = Message::new();
        message.set("state", "abc");
        message.set("state", "");
        assert!(!message.contains("state"));
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut message = Message::new();
        message.set("", "value");
        assert_eq!(message.iter().count(), 0);
    }

    #[test]
    fn duplicate_form_keys_merge_into_list() {
        let message = Message::read_form("scope=a&scope=b&scope=c");
        assert_eq!(
            message.get("scope").and_then(Parameter::as_string_list),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let message = Message::read_json(serde_json::json!({"custom_field": "x"}));
        assert_eq!(message.get_str("custom_field"), Some("x"));
    }

    #[test]
    fn named_accessors_read_and_write() {
        let mut request = Request::default();
        request.set_grant_type("authorization_code");
        assert_eq!(request.grant_type(), Some("authorization_code"));
    }
}
