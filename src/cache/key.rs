use std::fmt;

use http::Uri;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::vary::{Vary, VaryOptions};
use crate::http::{CacheRequest, HttpResponse, normalize_uri};

/// Version written into every persisted key.
pub const KEY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("persisted key is missing the '{0}' property")]
    MissingProperty(&'static str),
    #[error("unsupported persisted key version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid key uri '{0}'")]
    InvalidUri(String),
    #[error("malformed vary entry '{0}'")]
    MalformedVary(String),
}

/// Lookup key of a stored response: normalized URI plus resolved Vary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    uri: Uri,
    vary: Vary,
}

impl Key {
    /// Builds a key for a raw lookup, normalizing `uri`.
    pub fn new(uri: &Uri, vary: Vary) -> Self {
        Self {
            uri: normalize_uri(uri),
            vary,
        }
    }

    /// Derives the key a response to `request` is stored under.
    pub fn create(request: &CacheRequest, response: &HttpResponse, options: VaryOptions) -> Self {
        Self {
            uri: request.normalized_uri(),
            vary: Vary::resolve(response.headers(), request, options),
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn vary(&self) -> &Vary {
        &self.vary
    }

    /// Whether this key can answer `request`, whose URI is already normalized.
    pub fn matches(&self, normalized_uri: &Uri, request: &CacheRequest) -> bool {
        &self.uri == normalized_uri && self.vary.matches(request)
    }

    pub fn to_properties(&self) -> KeyProperties {
        KeyProperties {
            version: KEY_FORMAT_VERSION,
            uri: Some(self.uri.to_string()),
            vary: Some(self.vary.to_string()),
        }
    }

    pub fn from_properties(properties: &KeyProperties) -> Result<Self, KeyParseError> {
        if properties.version != KEY_FORMAT_VERSION {
            return Err(KeyParseError::UnsupportedVersion(properties.version));
        }
        let raw_uri = properties
            .uri
            .as_deref()
            .ok_or(KeyParseError::MissingProperty("uri"))?;
        let uri: Uri = raw_uri
            .parse()
            .map_err(|_| KeyParseError::InvalidUri(raw_uri.to_string()))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(KeyParseError::InvalidUri(raw_uri.to_string()));
        }
        let raw_vary = properties
            .vary
            .as_deref()
            .ok_or(KeyParseError::MissingProperty("vary"))?;
        let vary = Vary::parse(raw_vary)?;
        Ok(Self::new(&uri, vary))
    }

    /// Stable content-addressed identifier used to name persisted files.
    pub fn storage_id(&self) -> String {
        let canonical = format!("uri={}\nvary={}", self.uri, self.vary);
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uri={} vary={}", self.uri, self.vary)
    }
}

/// Persisted form of a [`Key`]: the `uri` and `vary` string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyProperties {
    #[serde(default = "default_key_version")]
    pub version: u32,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub vary: Option<String>,
}

fn default_key_version() -> u32 {
    KEY_FORMAT_VERSION
}
