//! The persisted audit record of one proxied exchange.
//!
//! Text fields hold the captured bytes verbatim when they are valid UTF-8.
//! Anything else is stored as standard base64 and flagged by the matching
//! `*_encoding` field, so the original bytes can always be recovered.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the caller's API credential.
pub const API_KEY_HEADER: &str = "api-key";

/// Header carrying the test-run correlation token.
pub const TEST_RUN_ID_HEADER: &str = "x-testrun-id";

/// Everything the transport knows about a completed round trip.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Request headers as received from the client, before rewriting.
    pub headers: HeaderMap,
    /// Path of the inbound request.
    pub url: String,
    /// Upstream status code.
    pub status: u16,
    /// Request body bytes as forwarded upstream.
    pub request: Bytes,
    /// Response body bytes as returned to the client.
    pub response: Bytes,
}

/// How a captured byte field is represented in its text field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

impl Encoding {
    pub fn is_utf8(&self) -> bool {
        matches!(self, Encoding::Utf8)
    }

    /// Represent `bytes` as text, falling back to base64.
    pub fn encode(bytes: &[u8]) -> (String, Self) {
        match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_owned(), Encoding::Utf8),
            Err(_) => (STANDARD.encode(bytes), Encoding::Base64),
        }
    }

    /// Recover the captured bytes from their text form.
    pub fn decode(self, text: &str) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Base64 => STANDARD.decode(text),
        }
    }
}

/// One recorded exchange. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "apikey")]
    pub api_key: String,
    #[serde(rename = "testrunid")]
    pub test_run_id: String,
    pub status: u16,
    pub url: String,
    pub headers: String,
    #[serde(default, skip_serializing_if = "Encoding::is_utf8")]
    pub headers_encoding: Encoding,
    pub request: String,
    #[serde(default, skip_serializing_if = "Encoding::is_utf8")]
    pub request_encoding: Encoding,
    pub response: String,
    #[serde(default, skip_serializing_if = "Encoding::is_utf8")]
    pub response_encoding: Encoding,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Build a record with a fresh id, stamped with the current time.
    pub fn from_exchange(exchange: &Exchange) -> Self {
        let (headers, headers_encoding) = Encoding::encode(&flatten_headers(&exchange.headers));
        let (request, request_encoding) = Encoding::encode(&exchange.request);
        let (response, response_encoding) = Encoding::encode(&exchange.response);

        Self {
            id: Uuid::new_v4(),
            api_key: header_value(&exchange.headers, API_KEY_HEADER),
            test_run_id: header_value(&exchange.headers, TEST_RUN_ID_HEADER),
            status: exchange.status,
            url: exchange.url.clone(),
            headers,
            headers_encoding,
            request,
            request_encoding,
            response,
            response_encoding,
            timestamp: Utc::now(),
        }
    }

    /// Flattened request headers exactly as captured.
    pub fn header_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        self.headers_encoding.decode(&self.headers)
    }

    /// Request body exactly as forwarded upstream.
    pub fn request_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        self.request_encoding.decode(&self.request)
    }

    /// Response body exactly as delivered to the client.
    pub fn response_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        self.response_encoding.decode(&self.response)
    }
}

/// First value of `name`, or an empty string when absent.
///
/// These are lookup keys; the raw value is also kept in `headers`.
fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// `name:value,` for every value of every header, duplicates included.
pub fn flatten_headers(headers: &HeaderMap) -> Vec<u8> {
    let mut flat = Vec::new();
    for (name, value) in headers {
        flat.extend_from_slice(name.as_str().as_bytes());
        flat.push(b':');
        flat.extend_from_slice(value.as_bytes());
        flat.push(b',');
    }
    flat
}
