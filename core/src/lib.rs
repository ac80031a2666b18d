//! Fluent request builder over a pluggable HTTP transport.
//!
//! # Overview
//! A `RequestBuilder` collects method, path (with `:name` parameters),
//! query, headers, body and transport options through chained calls, then
//! either yields the finalized `RequestOptions` (no I/O) or drives a bound
//! `Transport` exactly once and resolves to a `Response` with status-range
//! predicates and named status flags.
//!
//! # Design
//! - The transport is injected (`upon`), so the builder itself never does
//!   I/O; `HttpTransport` is the default, backed by `ureq`.
//! - Execution is memoized: every `to_future` on one builder observes the
//!   same outcome.
//! - 4xx/5xx responses resolve normally; `Response::error` exposes them.
//! - `Toget` binds a host and a transport and hands out fresh builders.

pub mod builder;
pub mod client;
pub mod error;
pub mod http;
pub mod jar;
pub mod path;
pub mod response;
pub mod status;
pub mod transport;

pub use builder::{RequestBuilder, ResponseFuture};
pub use client::Toget;
pub use error::{Error, ResponseError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, RawResponse, RequestBody, RequestOptions, ResponseBody};
pub use jar::CookieJar;
pub use path::PathTemplate;
pub use response::Response;
pub use status::StatusFlags;
pub use transport::{Completion, HttpTransport, Transport};
