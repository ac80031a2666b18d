//! HTTP data types shared by the builder, the transport and the response.
//!
//! # Design
//! `RequestOptions` is the finalized descriptor handed to a `Transport`.
//! Every optional field stays `None` until a builder call sets it, so an
//! unconfigured builder serializes to nothing but `{"url": ...}`. The cookie
//! jar is carried along for the transport but never serialized.
//!
//! `RawResponse` is what a transport reports back; `Response` wraps it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::jar::CookieJar;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only POST and PUT requests may carry a body.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity body for POST and PUT requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl RequestBody {
    /// Bytes to put on the wire. JSON values are serialized, strings sent as-is.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RequestBody::Json(Value::String(s)) | RequestBody::Text(s) => s.as_bytes().to_vec(),
            RequestBody::Json(value) => value.to_string().into_bytes(),
            RequestBody::Bytes(bytes) => bytes.clone(),
        }
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        RequestBody::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        RequestBody::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        RequestBody::Bytes(value)
    }
}

/// Finalized request descriptor, ready to be passed to a `Transport`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestOptions {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gzip: Option<bool>,

    /// Milliseconds to wait for the server before aborting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(skip)]
    pub jar: Option<CookieJar>,

    /// `Some(None)` asks for the raw bytes of the response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Option<String>>,
}

impl RequestOptions {
    pub fn wants_json(&self) -> bool {
        self.json.unwrap_or(false)
    }

    pub fn wants_gzip(&self) -> bool {
        self.gzip.unwrap_or(false)
    }
}

/// Response body as decoded by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl ResponseBody {
    /// Truthiness in the JavaScript sense: empty text, `null`, `false` and
    /// `0` are falsy; byte buffers, arrays and objects are always truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            ResponseBody::Empty => false,
            ResponseBody::Text(s) => !s.is_empty(),
            ResponseBody::Bytes(_) => true,
            ResponseBody::Json(value) => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
                Value::String(s) => !s.is_empty(),
                Value::Array(_) | Value::Object(_) => true,
            },
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(s) => Some(s),
            ResponseBody::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => Ok(()),
            ResponseBody::Text(s) => f.write_str(s),
            ResponseBody::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            ResponseBody::Json(value) => write!(f, "{value}"),
        }
    }
}

impl Serialize for ResponseBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResponseBody::Empty => serializer.serialize_str(""),
            ResponseBody::Text(s) => serializer.serialize_str(s),
            ResponseBody::Bytes(bytes) => serializer.serialize_bytes(bytes),
            ResponseBody::Json(value) => value.serialize(serializer),
        }
    }
}

/// A response as reported by a `Transport`.
///
/// Header names are lower-case. `url` and `method` are filled in from the
/// request descriptor when the transport leaves them unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
}

impl RawResponse {
    pub fn new(status_code: u16, body: ResponseBody) -> Self {
        Self {
            status_code,
            body,
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}
