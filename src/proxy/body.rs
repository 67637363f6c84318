//! Body classification for relayed requests and responses

use bytes::Bytes;
use serde::de::IgnoredAny;

/// How a body is materialized, chosen from its `Content-Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Text,
    Binary,
}

impl BodyKind {
    /// Classify an incoming request body
    pub fn for_request(content_type: Option<&str>) -> Self {
        let content_type = content_type.map(str::to_ascii_lowercase).unwrap_or_default();

        if content_type.starts_with("application/json") {
            BodyKind::Json
        } else if content_type.starts_with("text/") {
            BodyKind::Text
        } else {
            BodyKind::Binary
        }
    }

    /// Classify an upstream response body
    ///
    /// Documents, images and octet streams are binary; everything else is read as text.
    pub fn for_response(content_type: Option<&str>) -> Self {
        let content_type = content_type.map(str::to_ascii_lowercase).unwrap_or_default();

        if content_type.starts_with("application/pdf")
            || content_type.starts_with("image/")
            || content_type.starts_with("application/octet-stream")
        {
            BodyKind::Binary
        } else {
            BodyKind::Text
        }
    }
}

/// A relayed body, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum RelayBody {
    /// No body was sent
    Empty,
    /// A syntactically valid JSON document, kept as received
    Json(Bytes),
    Text(String),
    Binary(Bytes),
}

impl RelayBody {
    /// Materialize raw bytes as `kind`
    ///
    /// JSON is validated but never re-encoded, so numbers keep their exact
    /// spelling. Bytes that do not parse as the declared kind are kept as
    /// binary and still reach the other side unchanged.
    pub fn materialize(kind: BodyKind, bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return RelayBody::Empty;
        }

        match kind {
            BodyKind::Json => match serde_json::from_slice::<IgnoredAny>(&bytes) {
                Ok(_) => RelayBody::Json(bytes),
                Err(e) => {
                    tracing::debug!(error = %e, "JSON body did not parse, relaying raw bytes");
                    RelayBody::Binary(bytes)
                }
            },
            BodyKind::Text => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => RelayBody::Text(text),
                Err(_) => RelayBody::Binary(bytes),
            },
            BodyKind::Binary => RelayBody::Binary(bytes),
        }
    }

    pub fn kind(&self) -> Option<BodyKind> {
        match self {
            RelayBody::Empty => None,
            RelayBody::Json(_) => Some(BodyKind::Json),
            RelayBody::Text(_) => Some(BodyKind::Text),
            RelayBody::Binary(_) => Some(BodyKind::Binary),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RelayBody::Empty)
    }

    /// Wire bytes of the body
    pub fn into_bytes(self) -> Bytes {
        match self {
            RelayBody::Empty => Bytes::new(),
            RelayBody::Json(bytes) | RelayBody::Binary(bytes) => bytes,
            RelayBody::Text(text) => Bytes::from(text),
        }
    }
}
