//! The transport seam.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::TransportError;

/// Body of an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(Value),
    /// A plain-text body (used by the enable/disable endpoints).
    Text(String),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

/// Raw outcome of a request.
///
/// `ok` mirrors the HTTP status class. `json` is `None` when the body was
/// empty or not JSON; `text` always carries the raw body for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub ok: bool,
    pub status: u16,
    pub json: Option<Value>,
    pub text: String,
}

impl TransportResponse {
    /// Build a successful JSON response.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            ok: (200..300).contains(&status),
            status,
            text: body.to_string(),
            json: Some(body),
        }
    }

    /// Build a response from a raw body, parsing JSON when possible.
    pub fn from_text(status: u16, text: String) -> Self {
        let json = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };
        Self {
            ok: (200..300).contains(&status),
            status,
            json,
            text,
        }
    }

    /// The JSON body if it is present and not an empty object.
    pub fn non_empty_json(&self) -> Option<&Value> {
        match &self.json {
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Null) | None => None,
            Some(v) => Some(v),
        }
    }
}

/// Something that can deliver a logical request to the remote authority.
///
/// Implementations own connection setup, authentication and timeouts. A
/// non-2xx status is not an error at this level; it comes back as a
/// response with `ok == false`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
    ) -> Result<TransportResponse, TransportError>;
}
