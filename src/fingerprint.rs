//! Canonical request fingerprints
//!
//! Two requests that differ only in header order, header-name case, query
//! parameter order or percent-encoding produce the same fingerprint.

use sha2::{Digest, Sha256};

use crate::storage::SerializableRequest;

/// Compute the SHA-256 fingerprint of a request
///
/// The fingerprint covers:
/// 1. Method (uppercase normalized)
/// 2. Path (normalized)
/// 3. Query parameters (decoded, sorted)
/// 4. The headers named in `headers` (lowercased names, trimmed values, sorted)
/// 5. Body
#[must_use]
pub fn fingerprint_request(request: &SerializableRequest, headers: &[String]) -> [u8; 32] {
    let mut hasher = Sha256::new();

    let method = request.method.to_uppercase();
    update_field(&mut hasher, method.as_bytes());

    let path = normalize_path(request.path());
    update_field(&mut hasher, path.as_bytes());

    let query = canonical_query(request.query().unwrap_or(""));
    hasher.update((query.len() as u32).to_le_bytes());
    for (key, value) in &query {
        update_field(&mut hasher, key.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }

    let mut selected: Vec<(String, String)> = headers
        .iter()
        .filter_map(|name| {
            request.headers.get(name).map(|values| {
                let joined = values
                    .iter()
                    .map(|v| v.trim())
                    .collect::<Vec<_>>()
                    .join(",");
                (name.to_lowercase(), joined)
            })
        })
        .collect();
    selected.sort();
    selected.dedup();
    hasher.update((selected.len() as u32).to_le_bytes());
    for (name, value) in &selected {
        update_field(&mut hasher, name.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }

    update_field(&mut hasher, &request.body);

    hasher.finalize().into()
}

/// First eight bytes of a fingerprint as hex, for log lines
#[must_use]
pub fn short_hex(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

/// Normalize a URL path
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();

    if trimmed.is_empty() || !trimmed.starts_with('/') {
        format!("/{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Percent-decoded query pairs sorted by key, then value
fn canonical_query(query: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect();
    pairs.sort();
    pairs
}

fn decode_component(component: &str) -> String {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |decoded| decoded.into_owned())
}
