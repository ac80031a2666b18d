//! Transport capability and the default ureq-backed implementation.
//!
//! # Design
//! The builder never performs I/O itself. It hands a finalized
//! `RequestOptions` plus a `Completion` callback to a `Transport`, which must
//! invoke the callback exactly once. What `dispatch` returns is up to the
//! transport; `RequestBuilder::exec` passes it straight back to the caller.
//!
//! `HttpTransport` runs each request on its own worker thread with a
//! blocking `ureq` agent, so the caller's thread (or async task) is never
//! blocked. HTTP error statuses are data, never transport errors.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;
use ureq::http;
use ureq::typestate::WithBody;

use crate::error::{TransportError, TransportErrorKind};
use crate::http::{HttpMethod, RawResponse, RequestBody, RequestOptions, ResponseBody};
use crate::jar::CookieJar;

/// Callback a transport invokes once the request has finished.
pub type Completion = Box<dyn FnOnce(Result<RawResponse, TransportError>) + Send + 'static>;

/// Something that can perform an HTTP request described by `RequestOptions`.
pub trait Transport: Send + Sync + 'static {
    /// Live handle returned to `exec` callers.
    ///
    /// Completion is all-or-nothing: the callback receives the status,
    /// headers and the fully read body together. A transport that wants to
    /// expose a response while its body is still arriving has to do so
    /// through its handle. `HttpTransport` does not; its handle is the
    /// worker thread, joinable once the callback has run.
    type Handle;

    fn dispatch(&self, options: RequestOptions, done: Completion) -> Self::Handle;
}

/// Default transport over a blocking `ureq` agent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl Default for HttpTransport {
    fn default() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured agent (proxy, user agent, global timeouts, ...).
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }

    /// Perform the request on the current thread.
    pub fn execute(&self, options: &RequestOptions) -> Result<RawResponse, TransportError> {
        let method = options.method.unwrap_or(HttpMethod::Get);
        let url = options.url.as_str();
        debug!(%method, url, "sending request");

        let result = match method {
            HttpMethod::Get => prepare(self.agent.get(url), options).call(),
            HttpMethod::Delete => prepare(self.agent.delete(url), options).call(),
            HttpMethod::Post => send(prepare(self.agent.post(url), options), options),
            HttpMethod::Put => send(prepare(self.agent.put(url), options), options),
        };
        let mut response = result.map_err(transport_error)?;

        let status_code = response.status().as_u16();
        if let Some(jar) = &options.jar {
            store_cookies(jar, response.headers());
        }
        let headers = collect_headers(response.headers());
        let bytes = response.body_mut().read_to_vec().map_err(transport_error)?;
        debug!(status_code, len = bytes.len(), url, "received response");

        Ok(RawResponse {
            status_code,
            headers,
            body: decode_body(bytes, options),
            url: None,
            method: None,
        })
    }
}

impl Transport for HttpTransport {
    type Handle = JoinHandle<()>;

    fn dispatch(&self, options: RequestOptions, done: Completion) -> JoinHandle<()> {
        let transport = self.clone();
        thread::spawn(move || done(transport.execute(&options)))
    }
}

/// Apply headers, cookies and per-request config shared by every method.
fn prepare<B>(mut req: ureq::RequestBuilder<B>, options: &RequestOptions) -> ureq::RequestBuilder<B> {
    let mut cookie = None;
    if let Some(headers) = &options.headers {
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("cookie") {
                cookie = Some(value.clone());
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }
    }
    if let Some(jar) = options.jar.as_ref().filter(|jar| !jar.is_empty()) {
        let from_jar = jar.cookie_string();
        cookie = Some(match cookie {
            Some(existing) => format!("{existing}; {from_jar}"),
            None => from_jar,
        });
    }
    if let Some(cookie) = cookie {
        req = req.header("cookie", cookie.as_str());
    }

    if options.wants_json() && !has_header(options, "accept") {
        req = req.header("accept", "application/json");
    }
    if options.wants_gzip() {
        req = req.header("accept-encoding", "gzip");
    }

    let mut config = req.config().http_status_as_error(false);
    if let Some(ms) = options.timeout {
        config = config.timeout_global(Some(Duration::from_millis(ms)));
    }
    config.build()
}

fn send(
    mut req: ureq::RequestBuilder<WithBody>,
    options: &RequestOptions,
) -> Result<http::Response<ureq::Body>, ureq::Error> {
    let Some(body) = &options.body else {
        return req.send_empty();
    };
    let bytes = match body {
        RequestBody::Json(value) if options.wants_json() => value.to_string().into_bytes(),
        other => other.to_bytes(),
    };
    if options.wants_json() && !has_header(options, "content-type") {
        req = req.content_type("application/json");
    }
    req.send(&bytes[..])
}

fn has_header(options: &RequestOptions, name: &str) -> bool {
    options
        .headers
        .as_ref()
        .is_some_and(|headers| headers.keys().any(|key| key.eq_ignore_ascii_case(name)))
}

fn store_cookies(jar: &CookieJar, headers: &http::HeaderMap) {
    for value in headers.get_all(http::header::SET_COOKIE) {
        if let Ok(value) = value.to_str() {
            jar.set_cookie(value);
        }
    }
}

fn collect_headers(headers: &http::HeaderMap) -> BTreeMap<String, String> {
    let mut collected: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    collected
}

/// Decode the body according to `encoding` and the `json` flag.
fn decode_body(bytes: Vec<u8>, options: &RequestOptions) -> ResponseBody {
    let encoding = match &options.encoding {
        Some(None) => return ResponseBody::Bytes(bytes),
        Some(Some(name)) => Some(name.as_str()),
        None => None,
    };
    if bytes.is_empty() {
        return ResponseBody::Empty;
    }
    let text = decode_text(&bytes, encoding);
    if options.wants_json() {
        if let Ok(value) = serde_json::from_str(&text) {
            return ResponseBody::Json(value);
        }
    }
    ResponseBody::Text(text)
}

fn decode_text(bytes: &[u8], encoding: Option<&str>) -> String {
    match encoding.map(str::to_ascii_lowercase).as_deref() {
        None | Some("utf8") | Some("utf-8") => String::from_utf8_lossy(bytes).into_owned(),
        Some("latin1") | Some("binary") => bytes.iter().map(|&b| b as char).collect(),
        Some("ascii") => bytes.iter().map(|&b| (b & 0x7f) as char).collect(),
        Some("hex") => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Some(other) => {
            debug!(encoding = other, "unsupported encoding, decoding as utf-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn transport_error(err: ureq::Error) -> TransportError {
    let kind = match &err {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => TransportErrorKind::Connect,
        ureq::Error::Io(io) => match io.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                TransportErrorKind::Connect
            }
            _ => TransportErrorKind::Io,
        },
        ureq::Error::BadUri(_) | ureq::Error::Http(_) => TransportErrorKind::Protocol,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> RequestOptions {
        RequestOptions {
            url: "http://localhost:3000/".to_string(),
            ..RequestOptions::default()
        }
    }

    #[test]
    fn null_encoding_keeps_bytes() {
        let mut opts = options();
        opts.encoding = Some(None);
        let body = decode_body(vec![0x89, 0x50], &opts);
        assert_eq!(body, ResponseBody::Bytes(vec![0x89, 0x50]));
    }

    #[test]
    fn json_flag_parses_body() {
        let mut opts = options();
        opts.json = Some(true);
        let body = decode_body(br#"{"id":1}"#.to_vec(), &opts);
        assert_eq!(body, ResponseBody::Json(json!({ "id": 1 })));
    }

    #[test]
    fn json_flag_falls_back_to_text() {
        let mut opts = options();
        opts.json = Some(true);
        let body = decode_body(b"NO_TIMEOUT".to_vec(), &opts);
        assert_eq!(body, ResponseBody::Text("NO_TIMEOUT".to_string()));
    }

    #[test]
    fn empty_body_decodes_to_empty() {
        assert_eq!(decode_body(Vec::new(), &options()), ResponseBody::Empty);
    }

    #[test]
    fn named_encodings() {
        assert_eq!(decode_text(&[0xe9], Some("latin1")), "é");
        assert_eq!(decode_text(&[0xab, 0x01], Some("hex")), "ab01");
        assert_eq!(decode_text(b"hi", Some("UTF-8")), "hi");
        assert_eq!(decode_text(b"hi", Some("klingon")), "hi");
    }

    #[test]
    fn duplicate_headers_are_joined() {
        let mut map = http::HeaderMap::new();
        map.append("x-tag", http::HeaderValue::from_static("a"));
        map.append("x-tag", http::HeaderValue::from_static("b"));
        let headers = collect_headers(&map);
        assert_eq!(headers.get("x-tag").map(String::as_str), Some("a, b"));
    }

    #[test]
    fn set_cookie_headers_fill_jar() {
        let mut map = http::HeaderMap::new();
        map.append(http::header::SET_COOKIE, http::HeaderValue::from_static("key2=value2; Path=/"));
        let jar = CookieJar::new();
        store_cookies(&jar, &map);
        assert_eq!(jar.get("key2").as_deref(), Some("value2"));
    }

    #[test]
    fn unreachable_host_reports_connect_or_io_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut opts = options();
        opts.url = format!("http://127.0.0.1:{port}/");
        opts.timeout = Some(2_000);
        let err = HttpTransport::new().execute(&opts).unwrap_err();
        assert_ne!(err.kind, TransportErrorKind::Dropped);
    }
}
