//! Topic scheme for broker-based backends.
//!
//! Topic structure: `{prefix}/v1/{tenant}/{endpoint}/{kind}/...`
//!
//! - `.../pub[/{subject}]` carries broadcasts
//! - `.../req/{client}/{seq}` carries requests
//! - `.../rep/{client}/{seq}` carries the matching replies
//!
//! Endpoint names, tenants and client ids must not contain `/`, `+` or `#`.

use serde::{Deserialize, Serialize};

/// Protocol version for topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Topic scheme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Tenant identifier
    pub tenant: String,
    /// Topic prefix (default: "syncer")
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            tenant: "default".to_string(),
            prefix: "syncer".to_string(),
        }
    }
}

impl TopicScheme {
    /// Create a new topic scheme with the given tenant.
    #[must_use]
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    fn tenant_base(&self) -> String {
        format!("{}/{}/{}", self.prefix, PROTOCOL_VERSION, self.tenant)
    }

    fn base(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.tenant_base())
    }

    /// Topic for a broadcast with the given subject.
    #[must_use]
    pub fn publish(&self, endpoint: &str, subject: &str) -> String {
        if subject.is_empty() {
            format!("{}/pub", self.base(endpoint))
        } else {
            format!("{}/pub/{subject}", self.base(endpoint))
        }
    }

    /// Filter matching every broadcast of an endpoint.
    #[must_use]
    pub fn publish_filter(&self, endpoint: &str) -> String {
        format!("{}/pub/#", self.base(endpoint))
    }

    /// Topic for a request.
    #[must_use]
    pub fn request(&self, endpoint: &str, client: &str, seq: u64) -> String {
        format!("{}/req/{client}/{seq}", self.base(endpoint))
    }

    /// Filter matching every request of an endpoint.
    #[must_use]
    pub fn request_filter(&self, endpoint: &str) -> String {
        format!("{}/req/+/+", self.base(endpoint))
    }

    /// Topic for the reply to a request.
    #[must_use]
    pub fn reply(&self, endpoint: &str, client: &str, seq: u64) -> String {
        format!("{}/rep/{client}/{seq}", self.base(endpoint))
    }

    /// Filter matching every reply addressed to one client.
    #[must_use]
    pub fn reply_filter(&self, endpoint: &str, client: &str) -> String {
        format!("{}/rep/{client}/+", self.base(endpoint))
    }

    /// Parse a topic to extract components.
    ///
    /// Returns `(endpoint, kind)` if valid.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(String, TopicKind)> {
        let expected_prefix = format!("{}/", self.tenant_base());
        let remainder = topic.strip_prefix(&expected_prefix)?;
        let mut parts = remainder.splitn(3, '/');

        let endpoint = parts.next().filter(|e| !e.is_empty())?.to_string();
        let kind = parts.next()?;
        let rest = parts.next();

        let kind = match (kind, rest) {
            ("pub", None) => TopicKind::Publish {
                subject: String::new(),
            },
            ("pub", Some(subject)) => TopicKind::Publish {
                subject: subject.to_string(),
            },
            ("req", Some(rest)) => {
                let (client, seq) = parse_correlation(rest)?;
                TopicKind::Request { client, seq }
            }
            ("rep", Some(rest)) => {
                let (client, seq) = parse_correlation(rest)?;
                TopicKind::Reply { client, seq }
            }
            _ => return None,
        };

        Some((endpoint, kind))
    }
}

fn parse_correlation(rest: &str) -> Option<(String, u64)> {
    let (client, seq) = rest.split_once('/')?;
    if client.is_empty() || seq.contains('/') {
        return None;
    }
    Some((client.to_string(), seq.parse().ok()?))
}

/// Kinds of topics in the scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// Broadcast with its subject
    Publish {
        /// Message subject (empty if none)
        subject: String,
    },
    /// Request from a client
    Request {
        /// Requesting client id
        client: String,
        /// Request sequence number
        seq: u64,
    },
    /// Reply to a client
    Reply {
        /// Requesting client id
        client: String,
        /// Sequence number of the answered request
        seq: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_generation() {
        let scheme = TopicScheme::new("factory-a");

        assert_eq!(scheme.publish("state", ""), "syncer/v1/factory-a/state/pub");
        assert_eq!(
            scheme.publish("state", "subj1"),
            "syncer/v1/factory-a/state/pub/subj1"
        );
        assert_eq!(
            scheme.request("sync", "c1", 7),
            "syncer/v1/factory-a/sync/req/c1/7"
        );
        assert_eq!(
            scheme.reply("sync", "c1", 7),
            "syncer/v1/factory-a/sync/rep/c1/7"
        );
    }

    #[test]
    fn filters() {
        let scheme = TopicScheme::new("tenant1");

        assert_eq!(scheme.publish_filter("state"), "syncer/v1/tenant1/state/pub/#");
        assert_eq!(scheme.request_filter("sync"), "syncer/v1/tenant1/sync/req/+/+");
        assert_eq!(
            scheme.reply_filter("sync", "c1"),
            "syncer/v1/tenant1/sync/rep/c1/+"
        );
    }

    #[test]
    fn topic_parsing_publish() {
        let scheme = TopicScheme::new("site-b");

        let (endpoint, kind) = scheme.parse("syncer/v1/site-b/state/pub").unwrap();
        assert_eq!(endpoint, "state");
        assert_eq!(
            kind,
            TopicKind::Publish {
                subject: String::new()
            }
        );

        let (_, kind) = scheme.parse("syncer/v1/site-b/state/pub/a/b").unwrap();
        assert_eq!(
            kind,
            TopicKind::Publish {
                subject: "a/b".to_string()
            }
        );
    }

    #[test]
    fn topic_parsing_request_reply() {
        let scheme = TopicScheme::new("site-b");

        let topic = scheme.request("sync", "client-9", 42);
        let (endpoint, kind) = scheme.parse(&topic).unwrap();
        assert_eq!(endpoint, "sync");
        assert_eq!(
            kind,
            TopicKind::Request {
                client: "client-9".to_string(),
                seq: 42
            }
        );

        let topic = scheme.reply("sync", "client-9", 42);
        assert!(matches!(
            scheme.parse(&topic),
            Some((_, TopicKind::Reply { seq: 42, .. }))
        ));
    }

    #[test]
    fn topic_parsing_rejects_foreign() {
        let scheme = TopicScheme::new("site-b");

        assert!(scheme.parse("syncer/v1/other/state/pub").is_none());
        assert!(scheme.parse("syncer/v1/site-b/sync/req/c1/x").is_none());
        assert!(scheme.parse("syncer/v1/site-b/sync/unknown").is_none());
        assert!(scheme.parse("syncer/v1/site-b/sync/req/c1").is_none());
    }
}
