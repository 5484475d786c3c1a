//! Wire messages.

/// A transport message: subject plus body.
///
/// Subscribers filter on the subject by prefix. The body carries serialized
/// documents or patches; an empty body is the resync sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    subject: String,
    body: Vec<u8>,
}

impl Message {
    /// Maximum body size backends are expected to carry.
    pub const MAX_SIZE: usize = 1024 * 1024;

    /// The empty sentinel message.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a message without a subject.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: String::new(),
            body: body.into(),
        }
    }

    /// Create a message with a subject.
    #[must_use]
    pub fn with_subject(subject: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// The subject (empty if none).
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consume the message, returning the body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Check whether the body is empty (the resync sentinel).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Check the subject against a subscriber filter (prefix match).
    #[must_use]
    pub fn matches(&self, filter: &str) -> bool {
        self.subject.starts_with(filter)
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self::new(body)
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Self::new(body.as_bytes())
    }
}
