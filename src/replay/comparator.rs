//! Request matching strategies for replay

use crate::config::{ComparatorKind, ReplayConfig};
use crate::fingerprint::fingerprint_request;
use crate::storage::{Interaction, SerializableRequest};

/// Outcome of comparing a request against one stored interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// The stored interaction may answer the request
    pub accept: bool,
    /// Stop scanning after this interaction, whatever `accept` says
    pub short_circuit: bool,
}

impl Verdict {
    /// Accept and stop
    pub const TAKE: Self = Self {
        accept: true,
        short_circuit: true,
    };

    /// Verdict for plain equality checks that keep scanning on mismatch
    #[must_use]
    pub fn matches(accept: bool) -> Self {
        Self {
            accept,
            short_circuit: false,
        }
    }
}

/// Decides whether a stored interaction answers a request
pub trait Comparator: Send + Sync {
    /// Compare `candidate` with `stored`
    fn compare(&self, candidate: &SerializableRequest, stored: &Interaction) -> Verdict;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Serves interactions strictly in recorded order, ignoring request content
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Comparator for Sequential {
    fn compare(&self, _candidate: &SerializableRequest, _stored: &Interaction) -> Verdict {
        Verdict::TAKE
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Method (case-insensitive) and URI equality
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodUri;

impl MethodUri {
    fn same_target(candidate: &SerializableRequest, stored: &SerializableRequest) -> bool {
        candidate.method.eq_ignore_ascii_case(&stored.method) && candidate.uri == stored.uri
    }
}

impl Comparator for MethodUri {
    fn compare(&self, candidate: &SerializableRequest, stored: &Interaction) -> Verdict {
        Verdict::matches(Self::same_target(candidate, &stored.request))
    }

    fn name(&self) -> &'static str {
        "method-uri"
    }
}

/// Method/URI equality plus identical values for each named header
#[derive(Debug, Clone, Default)]
pub struct HeaderSubset {
    names: Vec<String>,
}

impl HeaderSubset {
    /// Compare on the given header names (case-insensitive)
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl Comparator for HeaderSubset {
    fn compare(&self, candidate: &SerializableRequest, stored: &Interaction) -> Verdict {
        let accept = MethodUri::same_target(candidate, &stored.request)
            && self
                .names
                .iter()
                .all(|name| candidate.headers.get(name) == stored.request.headers.get(name));
        Verdict::matches(accept)
    }

    fn name(&self) -> &'static str {
        "header-subset"
    }
}

/// Method/URI equality plus byte-identical bodies
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyEquality;

impl Comparator for BodyEquality {
    fn compare(&self, candidate: &SerializableRequest, stored: &Interaction) -> Verdict {
        let accept = MethodUri::same_target(candidate, &stored.request)
            && candidate.body == stored.request.body;
        Verdict::matches(accept)
    }

    fn name(&self) -> &'static str {
        "body"
    }
}

/// Canonical fingerprint equality (see [`fingerprint_request`])
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    headers: Vec<String>,
}

impl Fingerprint {
    /// Fingerprint over the given header names
    #[must_use]
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers }
    }
}

impl Comparator for Fingerprint {
    fn compare(&self, candidate: &SerializableRequest, stored: &Interaction) -> Verdict {
        let accept = fingerprint_request(candidate, &self.headers)
            == fingerprint_request(&stored.request, &self.headers);
        Verdict::matches(accept)
    }

    fn name(&self) -> &'static str {
        "fingerprint"
    }
}

/// Conjunction: accepts when all accept, short-circuits when any does
pub struct AllOf(Vec<Box<dyn Comparator>>);

impl AllOf {
    /// Combine strategies
    #[must_use]
    pub fn new(comparators: Vec<Box<dyn Comparator>>) -> Self {
        Self(comparators)
    }
}

impl Comparator for AllOf {
    fn compare(&self, candidate: &SerializableRequest, stored: &Interaction) -> Verdict {
        self.0.iter().fold(
            Verdict {
                accept: true,
                short_circuit: false,
            },
            |acc, comparator| {
                let verdict = comparator.compare(candidate, stored);
                Verdict {
                    accept: acc.accept && verdict.accept,
                    short_circuit: acc.short_circuit || verdict.short_circuit,
                }
            },
        )
    }

    fn name(&self) -> &'static str {
        "all-of"
    }
}

/// Build the strategy selected in configuration
///
/// With `in_order`, a content-aware strategy is combined with [`Sequential`]
/// so only the next unconsumed interaction is considered.
#[must_use]
pub fn build_comparator(config: &ReplayConfig) -> Box<dyn Comparator> {
    let strategy: Box<dyn Comparator> = match config.comparator {
        ComparatorKind::Sequential => return Box::new(Sequential),
        ComparatorKind::MethodUri => Box::new(MethodUri),
        ComparatorKind::HeaderSubset => Box::new(HeaderSubset::new(config.match_headers.clone())),
        ComparatorKind::Body => Box::new(BodyEquality),
        ComparatorKind::Fingerprint => Box::new(Fingerprint::new(config.match_headers.clone())),
    };

    if config.in_order {
        Box::new(AllOf::new(vec![strategy, Box::new(Sequential)]))
    } else {
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SerializableResponse;
    use bytes::Bytes;

    fn stored(method: &str, uri: &str) -> Interaction {
        let mut request = SerializableRequest::new(method, uri);
        request.headers.append("X-Tenant", "acme");
        request.body = Bytes::from_static(b"{\"n\":1}");
        Interaction {
            request,
            response: SerializableResponse::new(200, "ok"),
        }
    }

    fn candidate(method: &str, uri: &str) -> SerializableRequest {
        let mut request = SerializableRequest::new(method, uri);
        request.headers.append("x-tenant", "acme");
        request.body = Bytes::from_static(b"{\"n\":1}");
        request
    }

    #[test]
    fn test_sequential_accepts_anything() {
        let verdict = Sequential.compare(
            &SerializableRequest::new("DELETE", "/unrelated"),
            &stored("GET", "/ping"),
        );
        assert_eq!(verdict, Verdict::TAKE);
    }

    #[test]
    fn test_method_uri() {
        let interaction = stored("GET", "/ping");

        assert!(MethodUri.compare(&candidate("get", "/ping"), &interaction).accept);
        assert!(!MethodUri.compare(&candidate("POST", "/ping"), &interaction).accept);
        assert!(!MethodUri.compare(&candidate("GET", "/ping?x=1"), &interaction).accept);
        assert!(!MethodUri.compare(&candidate("GET", "/pong"), &interaction).short_circuit);
    }

    #[test]
    fn test_header_subset() {
        let interaction = stored("GET", "/ping");
        let comparator = HeaderSubset::new(vec!["X-Tenant".to_string()]);

        assert!(comparator.compare(&candidate("GET", "/ping"), &interaction).accept);

        let mut other_tenant = candidate("GET", "/ping");
        other_tenant.headers = crate::storage::Headers::new();
        other_tenant.headers.append("X-Tenant", "globex");
        assert!(!comparator.compare(&other_tenant, &interaction).accept);
    }

    #[test]
    fn test_body_equality() {
        let interaction = stored("POST", "/items");

        assert!(BodyEquality.compare(&candidate("POST", "/items"), &interaction).accept);

        let mut different = candidate("POST", "/items");
        different.body = Bytes::from_static(b"{\"n\":2}");
        assert!(!BodyEquality.compare(&different, &interaction).accept);
    }

    #[test]
    fn test_fingerprint_ignores_query_order() {
        let interaction = stored("GET", "/search?a=1&b=2");
        let comparator = Fingerprint::new(vec![]);

        assert!(comparator.compare(&candidate("GET", "/search?b=2&a=1"), &interaction).accept);
        assert!(!comparator.compare(&candidate("GET", "/search?a=1"), &interaction).accept);
    }

    #[test]
    fn test_all_of_combines() {
        let interaction = stored("GET", "/ping");
        let strict = AllOf::new(vec![Box::new(MethodUri), Box::new(BodyEquality)]);
        assert_eq!(
            strict.compare(&candidate("GET", "/ping"), &interaction),
            Verdict::matches(true)
        );

        let ordered = AllOf::new(vec![Box::new(MethodUri), Box::new(Sequential)]);
        let verdict = ordered.compare(&candidate("GET", "/other"), &interaction);
        assert!(!verdict.accept);
        assert!(verdict.short_circuit);
    }

    #[test]
    fn test_build_from_config() {
        let mut config = ReplayConfig::default();
        assert_eq!(build_comparator(&config).name(), "sequential");

        config.comparator = ComparatorKind::HeaderSubset;
        assert_eq!(build_comparator(&config).name(), "header-subset");

        config.comparator = ComparatorKind::Fingerprint;
        assert_eq!(build_comparator(&config).name(), "fingerprint");
    }

    #[test]
    fn test_in_order_checks_only_next_interaction() {
        let config = ReplayConfig {
            comparator: ComparatorKind::MethodUri,
            in_order: true,
            ..Default::default()
        };
        let comparator = build_comparator(&config);
        assert_eq!(comparator.name(), "all-of");

        let interaction = stored("GET", "/ping");
        assert_eq!(
            comparator.compare(&candidate("GET", "/ping"), &interaction),
            Verdict::TAKE
        );
        let verdict = comparator.compare(&candidate("GET", "/other"), &interaction);
        assert!(!verdict.accept);
        assert!(verdict.short_circuit);

        // Sequential is already in order
        let config = ReplayConfig {
            in_order: true,
            ..Default::default()
        };
        assert_eq!(build_comparator(&config).name(), "sequential");
    }
}
