//! Typed view over a raw transport response.
//!
//! # Design
//! `Response` is built once from a `RawResponse` and never changes. The
//! status flags are computed eagerly from the shared status table; the
//! range predicates and `error()` are derived from the status code on every
//! call and therefore always agree with each other.

use std::collections::BTreeMap;

use crate::error::ResponseError;
use crate::http::{HttpMethod, RawResponse, ResponseBody};
use crate::status::{self, StatusFlags};

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    raw: RawResponse,
    status: StatusFlags,
}

impl Response {
    pub fn new(raw: RawResponse) -> Self {
        let status = StatusFlags::for_code(raw.status_code);
        Self { raw, status }
    }

    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    pub fn into_raw(self) -> RawResponse {
        self.raw
    }

    pub fn status_code(&self) -> u16 {
        self.raw.status_code
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.raw.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.raw.header(name)
    }

    pub fn body(&self) -> &ResponseBody {
        &self.raw.body
    }

    /// URL the request was sent to.
    pub fn url(&self) -> Option<&str> {
        self.raw.url.as_deref()
    }

    pub fn method(&self) -> Option<HttpMethod> {
        self.raw.method
    }

    /// Status range: `404 -> 4`.
    pub fn status_class(&self) -> u16 {
        self.raw.status_code / 100
    }

    /// Named status flags, e.g. `status().get("notFound")`.
    pub fn status(&self) -> &StatusFlags {
        &self.status
    }

    /// 1xx
    pub fn is_informational(&self) -> bool {
        self.status_class() == 1
    }

    /// 2xx
    pub fn is_ok(&self) -> bool {
        self.status_class() == 2
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        self.status_class() == 4
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        self.status_class() == 5
    }

    /// `None` unless the status is 4xx or 5xx. A truthy body is returned
    /// unchanged, otherwise the error names the status.
    pub fn error(&self) -> Option<ResponseError> {
        if !self.is_client_error() && !self.is_server_error() {
            return None;
        }
        if self.raw.body.is_truthy() {
            return Some(ResponseError::Body(self.raw.body.clone()));
        }
        let label = match status::name(self.raw.status_code) {
            Some(name) => name.to_string(),
            None => self.status_class().to_string(),
        };
        Some(ResponseError::Status {
            status_code: self.raw.status_code,
            message: format!("response got {label}"),
        })
    }
}

impl From<RawResponse> for Response {
    fn from(raw: RawResponse) -> Self {
        Response::new(raw)
    }
}
