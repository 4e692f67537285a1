//! Cassette data model and line format
//!
//! A cassette file is JSON Lines: one self-contained interaction per line,
//! so a file cut short by a crash still parses up to its last full record.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::{ReelError, Result};

/// Record terminator
pub const RECORD_SEPARATOR: u8 = b'\n';

/// Ordered header multimap
///
/// Names keep the spelling and position of their first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Vec<String>)>);

impl Headers {
    /// Create an empty header set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, grouping it with an existing entry of the same name
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self
            .0
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some((_, values)) => values.push(value),
            None => self.0.push((name, vec![value])),
        }
    }

    /// All values for a name (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// First value for a name (case-insensitive)
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Iterate entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Number of distinct names
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(String, Vec<String>)>> for Headers {
    fn from(entries: Vec<(String, Vec<String>)>) -> Self {
        Self(entries)
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Headers, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    entries.push((name, values));
                }
                Ok(Headers(entries))
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Body bytes as stored on disk: text when valid UTF-8, hex otherwise
mod body_repr {
    use super::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    #[serde(rename_all = "lowercase")]
    enum BodyRef<'a> {
        Text(&'a str),
        Hex(String),
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "lowercase")]
    enum BodyOwned {
        Text(String),
        Hex(String),
    }

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(body) {
            Ok(text) => BodyRef::Text(text).serialize(serializer),
            Err(_) => BodyRef::Hex(hex::encode(body)).serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        match BodyOwned::deserialize(deserializer)? {
            BodyOwned::Text(text) => Ok(Bytes::from(text)),
            BodyOwned::Hex(encoded) => hex::decode(encoded)
                .map(Bytes::from)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Transport-independent HTTP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableRequest {
    /// HTTP method as received
    pub method: String,
    /// Path and query as received
    pub uri: String,
    /// All request headers, in arrival order
    pub headers: Headers,
    /// Exact body bytes
    #[serde(with = "body_repr")]
    pub body: Bytes,
}

impl SerializableRequest {
    /// Create a request without headers or body
    #[must_use]
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Path component of the URI
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(&self.uri, |(path, _)| path)
    }

    /// Raw query component of the URI, if any
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.split_once('?').map(|(_, query)| query)
    }
}

/// Transport-independent HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableResponse {
    /// HTTP status code
    pub status: u16,
    /// All response headers, in arrival order
    pub headers: Headers,
    /// Exact body bytes
    #[serde(with = "body_repr")]
    pub body: Bytes,
}

impl SerializableResponse {
    /// Create a response without headers
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// The `Content-Type` header, if present
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.first("content-type")
    }
}

/// One recorded request/response pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Request as received from the caller
    pub request: SerializableRequest,
    /// Response as returned to the caller
    pub response: SerializableResponse,
}

/// Ordered interactions backed by one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cassette {
    /// Location of the cassette file
    pub path: PathBuf,
    /// Interactions in recorded order
    pub interactions: Vec<Interaction>,
}

impl Cassette {
    /// Create an empty cassette for a path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interactions: Vec::new(),
        }
    }

    /// Encode every interaction as consecutive records
    ///
    /// # Errors
    ///
    /// Returns error if an interaction cannot be serialized
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for interaction in &self.interactions {
            data.extend_from_slice(&encode_interaction(interaction)?);
        }
        Ok(data)
    }

    /// Decode cassette content read from `path`
    ///
    /// # Errors
    ///
    /// Returns `MalformedCassette` if a complete record does not parse
    pub fn decode(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            interactions: decode_interactions(data)?,
        })
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the cassette holds no interactions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }
}

/// Encode a single interaction as one terminated record
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_interaction(interaction: &Interaction) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(interaction)
        .map_err(|e| ReelError::Other(format!("Failed to encode interaction: {e}")))?;
    line.push(RECORD_SEPARATOR);
    Ok(line)
}

/// Decode all records in order
///
/// Blank lines are skipped. An unterminated final fragment that does not
/// parse is a torn write and is dropped.
///
/// # Errors
///
/// Returns `MalformedCassette` with the 1-based line number of the first bad record
pub fn decode_interactions(data: &[u8]) -> Result<Vec<Interaction>> {
    let mut interactions = Vec::new();
    let terminated = data.last().map_or(true, |&b| b == RECORD_SEPARATOR);
    let mut lines = data.split(|&b| b == RECORD_SEPARATOR).peekable();
    let mut line_no = 0;

    while let Some(line) = lines.next() {
        line_no += 1;
        let is_tail = lines.peek().is_none();

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Interaction>(line) {
            Ok(interaction) => interactions.push(interaction),
            Err(e) if is_tail && !terminated => {
                warn!(
                    "Dropping torn record at line {} ({} bytes): {}",
                    line_no,
                    line.len(),
                    e
                );
            }
            Err(e) => {
                return Err(ReelError::MalformedCassette {
                    line: line_no,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(interactions)
}
