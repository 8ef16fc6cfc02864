use std::collections::BTreeMap;
use std::fmt;

use http::HeaderMap;
use http::header::{AUTHORIZATION, VARY};

use super::key::KeyParseError;
use crate::http::CacheRequest;

const PAIR_SEPARATOR: char = ';';
const NAME_SEPARATOR: char = ':';

/// How Vary resolution treats request credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VaryOptions {
    /// Record the request's challenge identity as a synthetic `Authorization`
    /// entry, partitioning stored variants per credential.
    pub authorization: bool,
}

/// Request header values a stored response was selected by.
///
/// Names are stored lower-cased, so equality, hashing and the serialized form
/// do not depend on header order or case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Vary {
    headers: BTreeMap<String, String>,
}

impl Vary {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self { headers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolves the Vary mapping for a response to `request`.
    ///
    /// Header names listed in the response's `Vary` that the request does
    /// not carry are omitted rather than recorded as empty.
    pub fn resolve(
        response_headers: &HeaderMap,
        request: &CacheRequest,
        options: VaryOptions,
    ) -> Self {
        let mut headers = BTreeMap::new();
        for value in response_headers.get_all(VARY) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for name in value.split(',') {
                let name = name.trim().to_ascii_lowercase();
                if name.is_empty() || name == "*" {
                    continue;
                }
                if let Some(value) = request.header_str(&name) {
                    headers.insert(name, value.to_string());
                }
            }
        }
        if options.authorization
            && let Some(challenge) = request.challenge()
        {
            headers.insert(
                AUTHORIZATION.as_str().to_string(),
                challenge.identifier().to_string(),
            );
        }
        Self { headers }
    }

    /// Whether `request` carries the same value for every recorded header.
    pub fn matches(&self, request: &CacheRequest) -> bool {
        self.headers.iter().all(|(name, value)| {
            request_value(request, name).is_some_and(|candidate| candidate == value.as_str())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Parses the `name:value;name:value` form produced by `Display`.
    pub fn parse(input: &str) -> Result<Self, KeyParseError> {
        let mut headers = BTreeMap::new();
        if input.is_empty() {
            return Ok(Self { headers });
        }
        for pair in input.split(PAIR_SEPARATOR) {
            let (name, value) = pair
                .split_once(NAME_SEPARATOR)
                .ok_or_else(|| KeyParseError::MalformedVary(pair.to_string()))?;
            if name.is_empty() {
                return Err(KeyParseError::MalformedVary(pair.to_string()));
            }
            let value =
                unescape(value).ok_or_else(|| KeyParseError::MalformedVary(pair.to_string()))?;
            headers.insert(name.to_ascii_lowercase(), value);
        }
        Ok(Self { headers })
    }
}

fn request_value<'a>(request: &'a CacheRequest, name: &str) -> Option<&'a str> {
    if name == AUTHORIZATION.as_str()
        && let Some(challenge) = request.challenge()
    {
        return Some(challenge.identifier());
    }
    request.header_str(name)
}

impl fmt::Display for Vary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.headers {
            if !first {
                f.write_str(";")?;
            }
            first = false;
            write!(f, "{name}{NAME_SEPARATOR}{}", escape(value))?;
        }
        Ok(())
    }
}

// Values may legally contain ';', so the separator and the escape character
// are percent-encoded.
fn escape(value: &str) -> String {
    value.replace('%', "%25").replace(PAIR_SEPARATOR, "%3B")
}

fn unescape(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest.get(idx + 1..idx + 3)?;
        match code {
            "25" => out.push('%'),
            "3B" | "3b" => out.push(PAIR_SEPARATOR),
            _ => return None,
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Some(out)
}
