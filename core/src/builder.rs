//! Fluent request builder with one-shot, memoized execution.
//!
//! # Design
//! Configuration calls consume and return the builder so they chain from a
//! constructor. They only record settings; nothing is resolved until the
//! builder is finalized by `to_options`, `to_future` or `exec`:
//!
//! 1. the path template is rendered with the path parameters, if any;
//! 2. a body is dropped unless the method is POST or PUT;
//! 3. the URL is re-serialized from the base URL, path and query.
//!
//! Finalization happens once. Later configuration calls are not reflected
//! in the finalized descriptor.
//!
//! `to_future` calls the transport on its first invocation only. The
//! outcome is shared, so every later call observes the same response or
//! the same failure.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, Ready, Shared};
use futures::FutureExt;
use percent_encoding::utf8_percent_encode;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, TransportError, TransportErrorKind};
use crate::http::{HttpMethod, RawResponse, RequestBody, RequestOptions};
use crate::jar::CookieJar;
use crate::path::{PathTemplate, COMPONENT};
use crate::response::Response;
use crate::transport::{HttpTransport, Transport};

type SharedResponse = Shared<BoxFuture<'static, Result<Response, Error>>>;

enum Dispatch {
    NotStarted,
    Pending(SharedResponse),
    Done(Result<Response, Error>),
}

/// Accumulates request settings and drives a bound `Transport` at most once.
pub struct RequestBuilder<T = HttpTransport> {
    base_url: Url,
    path: String,
    path_params: Option<Map<String, Value>>,
    query: Option<Vec<(String, String)>>,
    config: RequestOptions,
    finalized: Option<RequestOptions>,
    transport: Option<Arc<T>>,
    dispatch: Dispatch,
}

impl RequestBuilder<HttpTransport> {
    /// Start a builder at the root of `base`. No transport is bound yet.
    pub fn new(base: &str) -> Result<Self, Error> {
        if base.trim().is_empty() {
            return Err(Error::InvalidArgument("\"base\" must be defined".to_string()));
        }
        let mut base_url = Url::parse(base)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidArgument(format!("\"{base}\" is not a base url")));
        }
        base_url.set_fragment(None);
        base_url.set_query(None);
        base_url.set_path("/");

        Ok(Self {
            base_url,
            path: "/".to_string(),
            path_params: None,
            query: None,
            config: RequestOptions::default(),
            finalized: None,
            transport: None,
            dispatch: Dispatch::NotStarted,
        })
    }
}

impl<T: Transport> RequestBuilder<T> {
    /// Bind the transport used by `to_future` and `exec`.
    ///
    /// A request already started through `to_future` stays memoized: later
    /// `to_future` calls keep observing that outcome and never reach the
    /// new transport. `exec` always uses the transport bound last.
    pub fn upon<U: Transport>(self, transport: Arc<U>) -> RequestBuilder<U> {
        RequestBuilder {
            base_url: self.base_url,
            path: self.path,
            path_params: self.path_params,
            query: self.query,
            config: self.config,
            finalized: self.finalized,
            transport: Some(transport),
            dispatch: self.dispatch,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }

    pub fn get(self, path: &str) -> Self {
        self.method_path(HttpMethod::Get, path, None)
    }

    pub fn post(self, path: &str) -> Self {
        self.method_path(HttpMethod::Post, path, None)
    }

    pub fn put(self, path: &str) -> Self {
        self.method_path(HttpMethod::Put, path, None)
    }

    pub fn delete(self, path: &str) -> Self {
        self.method_path(HttpMethod::Delete, path, None)
    }

    /// GET with `:name` placeholders filled from `params`. Anything other
    /// than a JSON object is ignored.
    pub fn get_with(self, path: &str, params: Value) -> Self {
        self.method_path(HttpMethod::Get, path, Some(params))
    }

    pub fn post_with(self, path: &str, params: Value) -> Self {
        self.method_path(HttpMethod::Post, path, Some(params))
    }

    pub fn put_with(self, path: &str, params: Value) -> Self {
        self.method_path(HttpMethod::Put, path, Some(params))
    }

    pub fn delete_with(self, path: &str, params: Value) -> Self {
        self.method_path(HttpMethod::Delete, path, Some(params))
    }

    fn method_path(mut self, method: HttpMethod, path: &str, params: Option<Value>) -> Self {
        self.config.method = Some(method);
        self.path = path.to_string();
        if let Some(Value::Object(params)) = params {
            self.path_params = Some(params);
        }
        self
    }

    /// Query string pairs; replaces any previous query.
    pub fn query<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = Some(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Request headers; replaces any previous headers.
    pub fn headers<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers: BTreeMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.config.headers = Some(headers);
        self
    }

    /// Send the body as JSON and parse the response body as JSON.
    pub fn json(mut self) -> Self {
        self.config.json = Some(true);
        self
    }

    /// Ask the server for gzip-compressed content.
    pub fn gzip(mut self) -> Self {
        self.config.gzip = Some(true);
        self
    }

    /// Milliseconds to wait for the server before the transport gives up.
    pub fn timeout(mut self, ms: u64) -> Self {
        self.config.timeout = Some(ms);
        self
    }

    pub fn jar(mut self, jar: CookieJar) -> Self {
        self.config.jar = Some(jar);
        self
    }

    /// Entity body. Only sent with POST and PUT.
    pub fn body(mut self, data: impl Into<RequestBody>) -> Self {
        self.config.body = Some(data.into());
        self
    }

    /// Response body encoding; `None` keeps the raw bytes.
    pub fn encoding(mut self, value: Option<&str>) -> Self {
        self.config.encoding = Some(value.map(str::to_string));
        self
    }

    /// The finalized descriptor. Performs no I/O.
    pub fn to_options(&mut self) -> Result<&RequestOptions, Error> {
        let options = match self.finalized.take() {
            Some(options) => options,
            None => self.build_options()?,
        };
        Ok(self.finalized.insert(options))
    }

    fn build_options(&self) -> Result<RequestOptions, Error> {
        let mut options = self.config.clone();

        let path = match &self.path_params {
            Some(params) => PathTemplate::compile(&self.path).render(params)?,
            None => self.path.clone(),
        };

        if !options.method.is_some_and(|m| m.allows_body()) {
            options.body = None;
        }

        let mut url = self.base_url.clone();
        url.set_path(&path);
        let mut href = url.to_string();
        // Appended by hand: `Url::set_query` would escape `'` for http(s).
        if let Some(pairs) = self.query.as_ref().filter(|pairs| !pairs.is_empty()) {
            href.push('?');
            href.push_str(&encode_query(pairs));
        }
        options.url = href;
        debug!(url = %options.url, method = ?options.method, "request options finalized");
        Ok(options)
    }

    fn bound_transport(&self) -> Result<Arc<T>, Error> {
        self.transport.clone().ok_or(Error::TransportNotBound)
    }

    /// Run the request once and share its outcome.
    ///
    /// Fails synchronously if no transport is bound or the options cannot
    /// be finalized. Transport failures arrive through the returned future.
    pub fn to_future(&mut self) -> Result<ResponseFuture, Error> {
        let transport = self.bound_transport()?;

        if let Dispatch::Pending(shared) = &self.dispatch {
            match shared.peek().cloned() {
                Some(result) => self.dispatch = Dispatch::Done(result),
                None => return Ok(ResponseFuture::shared(shared.clone())),
            }
        }
        if let Dispatch::Done(result) = &self.dispatch {
            return Ok(ResponseFuture::ready(result.clone()));
        }

        let options = self.to_options()?.clone();
        let (tx, rx) = oneshot::channel::<Result<RawResponse, TransportError>>();
        debug!(url = %options.url, "dispatching request");
        // The handle is only of interest to `exec` callers.
        let _ = transport.dispatch(
            options.clone(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let shared: SharedResponse = async move {
            let raw = match rx.await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(url = %options.url, "transport dropped completion without a result");
                    return Err(TransportError::new(
                        TransportErrorKind::Dropped,
                        "transport released the completion callback without invoking it",
                    )
                    .into());
                }
            };
            Ok::<_, Error>(Response::new(fill_request(raw, &options)))
        }
        .boxed()
        .shared();

        self.dispatch = Dispatch::Pending(shared.clone());
        Ok(ResponseFuture::shared(shared))
    }

    /// Hand the finalized options to the transport and return whatever it
    /// returns. Not memoized; each call dispatches again.
    pub fn exec<F>(&mut self, done: F) -> Result<T::Handle, Error>
    where
        F: FnOnce(Result<RawResponse, TransportError>) + Send + 'static,
    {
        let transport = self.bound_transport()?;
        let options = self.to_options()?.clone();
        debug!(url = %options.url, "executing request");
        Ok(transport.dispatch(options, Box::new(done)))
    }
}

/// `k=v&k2=v2` with keys and values escaped like `encodeURIComponent`.
fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, COMPONENT),
                utf8_percent_encode(value, COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Record the request's own url and method unless the transport set them.
fn fill_request(mut raw: RawResponse, options: &RequestOptions) -> RawResponse {
    if raw.url.is_none() {
        raw.url = Some(options.url.clone());
    }
    if raw.method.is_none() {
        raw.method = options.method;
    }
    raw
}

/// Future returned by `RequestBuilder::to_future`.
///
/// Every future from the same builder resolves to the same outcome.
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture {
    inner: Inner,
}

enum Inner {
    Shared(SharedResponse),
    Ready(Ready<Result<Response, Error>>),
}

impl ResponseFuture {
    fn shared(shared: SharedResponse) -> Self {
        Self {
            inner: Inner::Shared(shared),
        }
    }

    fn ready(result: Result<Response, Error>) -> Self {
        Self {
            inner: Inner::Ready(future::ready(result)),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Shared(shared) => shared.poll_unpin(cx),
            Inner::Ready(ready) => ready.poll_unpin(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseBody;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const HOST: &str = "http://localhost:3000";

    fn builder() -> RequestBuilder {
        RequestBuilder::new(HOST).unwrap()
    }

    /// Answers every request with a fixed result and counts dispatches.
    struct MockTransport {
        calls: AtomicUsize,
        seen: Mutex<Vec<RequestOptions>>,
        reply: Result<RawResponse, TransportError>,
    }

    impl MockTransport {
        fn replying(reply: Result<RawResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for MockTransport {
        type Handle = usize;

        fn dispatch(&self, options: RequestOptions, done: crate::transport::Completion) -> usize {
            self.seen.lock().unwrap().push(options);
            done(self.reply.clone());
            self.calls.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    /// Drops the completion without calling it.
    struct SilentTransport;

    impl Transport for SilentTransport {
        type Handle = ();

        fn dispatch(&self, _options: RequestOptions, _done: crate::transport::Completion) {}
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        futures::executor::block_on(fut)
    }

    #[test]
    fn empty_base_is_invalid() {
        assert!(matches!(RequestBuilder::new(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn unparsable_base_is_invalid_url() {
        assert!(matches!(RequestBuilder::new("not a url"), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn clean_options_only_have_url() {
        let mut req = builder();
        let value = serde_json::to_value(req.to_options().unwrap()).unwrap();
        assert_eq!(value, json!({ "url": "http://localhost:3000/" }));
    }

    #[test]
    fn base_path_query_and_hash_are_cleared() {
        let mut req = RequestBuilder::new("http://localhost:3000/api?x=1#top").unwrap();
        assert_eq!(req.to_options().unwrap().url, "http://localhost:3000/");
    }

    #[test]
    fn put_scenario_builds_full_options() {
        let mut req = builder()
            .put_with("/user/:id", json!({ "id": 123 }))
            .json()
            .body(json!({ "age": 40 }))
            .query([("key", "value")])
            .headers([("authorization", "w6et7iyuhljhbgvjchf")]);

        let value = serde_json::to_value(req.to_options().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "method": "PUT",
                "json": true,
                "body": { "age": 40 },
                "headers": { "authorization": "w6et7iyuhljhbgvjchf" },
                "url": "http://localhost:3000/user/123?key=value",
            })
        );
    }

    #[test]
    fn last_verb_wins() {
        let mut req = builder().post("/user").delete("/user/1");
        let options = req.to_options().unwrap();
        assert_eq!(options.method, Some(HttpMethod::Delete));
        assert_eq!(options.url, "http://localhost:3000/user/1");
    }

    #[test]
    fn body_dropped_for_get_and_delete() {
        for mut req in [builder().get("/user"), builder().delete("/user/1")] {
            req = req.body(json!({ "age": 40 }));
            assert!(req.to_options().unwrap().body.is_none());
        }
    }

    #[test]
    fn body_kept_for_post_and_put() {
        for mut req in [builder().post("/user"), builder().put("/user/1")] {
            req = req.body("payload");
            assert_eq!(
                req.to_options().unwrap().body,
                Some(RequestBody::Text("payload".to_string()))
            );
        }
    }

    #[test]
    fn body_dropped_without_method() {
        let mut req = builder().body("orphan");
        assert!(req.to_options().unwrap().body.is_none());
    }

    #[test]
    fn non_object_params_are_ignored() {
        let mut req = builder().get_with("/user/:id", json!(42));
        assert_eq!(req.to_options().unwrap().url, "http://localhost:3000/user/:id");
    }

    #[test]
    fn missing_path_param_fails_finalization() {
        let mut req = builder().get_with("/user/:id", json!({ "name": "x" }));
        assert!(matches!(req.to_options(), Err(Error::MissingPathParam(_))));
    }

    #[test]
    fn to_options_is_idempotent() {
        let mut req = builder().get_with("/user/:id", json!({ "id": 7 }));
        let first = req.to_options().unwrap().url.clone();
        let mut req = req.query([("late", "1")]);
        assert_eq!(req.to_options().unwrap().url, first);
    }

    #[test]
    fn headers_accept_empty_input() {
        let mut req = builder().headers(Vec::<(String, String)>::new());
        assert_eq!(req.to_options().unwrap().headers, Some(BTreeMap::new()));
    }

    #[test]
    fn flags_timeout_and_encoding() {
        let mut req = builder().get("/image").gzip().timeout(1000).encoding(None);
        let value = serde_json::to_value(req.to_options().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "url": "http://localhost:3000/image",
                "method": "GET",
                "gzip": true,
                "timeout": 1000,
                "encoding": null,
            })
        );
    }

    #[test]
    fn to_future_requires_transport() {
        let mut req = builder().get("/user");
        assert!(matches!(req.to_future(), Err(Error::TransportNotBound)));
    }

    #[test]
    fn exec_requires_transport() {
        let mut req = builder().get("/user");
        assert!(matches!(req.exec(|_| {}), Err(Error::TransportNotBound)));
    }

    #[test]
    fn transport_runs_once_for_repeated_futures() {
        let transport = MockTransport::replying(Ok(RawResponse::new(200, ResponseBody::Empty)));
        let mut req = builder().get("/user").upon(transport.clone());

        let first = block_on(req.to_future().unwrap()).unwrap();
        let second = block_on(req.to_future().unwrap()).unwrap();
        let third = block_on(req.to_future().unwrap()).unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn concurrent_observers_share_outcome() {
        let transport = MockTransport::replying(Ok(RawResponse::new(201, ResponseBody::Empty)));
        let mut req = builder().post("/user").upon(transport.clone());

        let a = req.to_future().unwrap();
        let b = req.to_future().unwrap();
        let (a, b) = block_on(future::join(a, b));

        assert_eq!(transport.calls(), 1);
        assert_eq!(a.unwrap().status_code(), 201);
        assert_eq!(b.unwrap().status_code(), 201);
    }

    #[test]
    fn response_gets_request_url_and_method() {
        let transport = MockTransport::replying(Ok(RawResponse::new(200, ResponseBody::Empty)));
        let mut req = builder().delete_with("/user/:id", json!({ "id": 1 })).upon(transport);

        let res = block_on(req.to_future().unwrap()).unwrap();
        assert_eq!(res.url(), Some("http://localhost:3000/user/1"));
        assert_eq!(res.method(), Some(HttpMethod::Delete));
    }

    #[test]
    fn transport_set_url_is_kept() {
        let mut raw = RawResponse::new(200, ResponseBody::Empty);
        raw.url = Some("http://localhost:3000/redirected".to_string());
        let transport = MockTransport::replying(Ok(raw));
        let mut req = builder().get("/user").upon(transport);

        let res = block_on(req.to_future().unwrap()).unwrap();
        assert_eq!(res.url(), Some("http://localhost:3000/redirected"));
        assert_eq!(res.method(), Some(HttpMethod::Get));
    }

    #[test]
    fn transport_error_passes_through_unchanged() {
        let failure = TransportError::new(TransportErrorKind::Timeout, "ESOCKETTIMEDOUT");
        let transport = MockTransport::replying(Err(failure.clone()));
        let mut req = builder().get("/timeout").timeout(10).upon(transport.clone());

        for _ in 0..2 {
            match block_on(req.to_future().unwrap()) {
                Err(Error::Transport(err)) => assert_eq!(err, failure),
                other => panic!("expected transport error, got {other:?}"),
            }
        }
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn status_errors_do_not_reject() {
        let transport = MockTransport::replying(Ok(RawResponse::new(404, ResponseBody::Empty)));
        let mut req = builder().get("/user/-1").upon(transport);

        let res = block_on(req.to_future().unwrap()).unwrap();
        assert!(res.is_client_error());
        assert!(res.error().is_some());
    }

    #[test]
    fn dropped_completion_rejects() {
        let mut req = builder().get("/user").upon(Arc::new(SilentTransport));
        match block_on(req.to_future().unwrap()) {
            Err(Error::Transport(err)) => assert_eq!(err.kind, TransportErrorKind::Dropped),
            other => panic!("expected dropped completion, got {other:?}"),
        }
    }

    #[test]
    fn transport_receives_pruned_options() {
        let transport = MockTransport::replying(Ok(RawResponse::new(200, ResponseBody::Empty)));
        let mut req = builder()
            .get_with("/user/:id", json!({ "id": 5 }))
            .body("ignored")
            .upon(transport.clone());

        block_on(req.to_future().unwrap()).unwrap();
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].body.is_none());
        assert_eq!(seen[0].url, "http://localhost:3000/user/5");
    }

    #[test]
    fn exec_returns_transport_handle_each_time() {
        let transport = MockTransport::replying(Ok(RawResponse::new(200, ResponseBody::Empty)));
        let mut req = builder().get("/image").upon(transport.clone());

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = req
            .exec(move |result| {
                tx.send(result.map(|raw| raw.status_code)).unwrap();
            })
            .unwrap();

        assert_eq!(handle, 1);
        assert_eq!(rx.recv().unwrap(), Ok(200));
        assert_eq!(req.exec(|_| {}).unwrap(), 2);
    }

    #[test]
    fn query_is_escaped_like_uri_components() {
        let mut req = builder()
            .get("/u")
            .query([("name", "Foo Bar"), ("x", "a'b(c)!"), ("q", "[1]&=")]);
        assert_eq!(
            req.to_options().unwrap().url,
            "http://localhost:3000/u?name=Foo%20Bar&x=a'b(c)!&q=%5B1%5D%26%3D"
        );
    }

    #[test]
    fn empty_query_adds_nothing() {
        let mut req = builder().get("/u").query(Vec::<(String, String)>::new());
        assert_eq!(req.to_options().unwrap().url, "http://localhost:3000/u");
    }

    #[test]
    fn rebinding_keeps_memoized_outcome() {
        let first = MockTransport::replying(Ok(RawResponse::new(200, ResponseBody::Empty)));
        let second = MockTransport::replying(Ok(RawResponse::new(500, ResponseBody::Empty)));
        let mut req = builder().get("/user").upon(first.clone());
        let res = block_on(req.to_future().unwrap()).unwrap();
        assert_eq!(res.status_code(), 200);

        let mut req = req.upon(first.clone());
        block_on(req.to_future().unwrap()).unwrap();
        let mut req = req.upon(second.clone());
        let res = block_on(req.to_future().unwrap()).unwrap();

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
        assert_eq!(res.status_code(), 200);
    }

    #[test]
    fn rebinding_while_pending_shares_dispatch() {
        let transport = MockTransport::replying(Ok(RawResponse::new(201, ResponseBody::Empty)));
        let mut req = builder().post("/user").upon(transport.clone());
        let pending = req.to_future().unwrap();

        let mut req = req.upon(transport.clone());
        let again = req.to_future().unwrap();
        let (a, b) = block_on(future::join(pending, again));

        assert_eq!(transport.calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn upon_keeps_configuration() {
        let transport = MockTransport::replying(Ok(RawResponse::new(200, ResponseBody::Empty)));
        let mut req = builder().post("/user").json().body(json!({ "id": 3 })).upon(transport);
        assert!(req.is_bound());
        let options = req.to_options().unwrap();
        assert_eq!(options.json, Some(true));
        assert_eq!(options.body, Some(RequestBody::Json(json!({ "id": 3 }))));
    }
}
