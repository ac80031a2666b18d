//! Entry point binding a base host to a transport.
//!
//! # Design
//! `Toget` holds only the host and a shared transport, and carries no
//! mutable state between calls. Each call hands out a fresh
//! `RequestBuilder`, so requests never share configuration or outcomes.

use std::sync::Arc;

use serde_json::Value;

use crate::builder::RequestBuilder;
use crate::error::Error;
use crate::transport::{HttpTransport, Transport};

/// Factory for request builders against one host.
#[derive(Debug)]
pub struct Toget<T = HttpTransport> {
    host: String,
    transport: Arc<T>,
}

impl<T> Clone for Toget<T> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl Toget<HttpTransport> {
    /// Bind `host` to the default ureq-backed transport.
    pub fn new(host: &str) -> Self {
        Self::with_transport(host, HttpTransport::new())
    }
}

impl<T: Transport> Toget<T> {
    pub fn with_transport(host: &str, transport: T) -> Self {
        Self::with_shared_transport(host, Arc::new(transport))
    }

    pub fn with_shared_transport(host: &str, transport: Arc<T>) -> Self {
        Self {
            host: host.to_string(),
            transport,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// A bare builder bound to the transport.
    pub fn request(&self) -> Result<RequestBuilder<T>, Error> {
        Ok(RequestBuilder::new(&self.host)?.upon(Arc::clone(&self.transport)))
    }

    /// A GET builder for `path`. An empty path gives a bare builder.
    pub fn get(&self, path: &str) -> Result<RequestBuilder<T>, Error> {
        let req = self.request()?;
        if path.is_empty() {
            return Ok(req);
        }
        Ok(req.get(path))
    }

    /// A GET builder for `path` with `:name` placeholders filled from `params`.
    pub fn get_with(&self, path: &str, params: Value) -> Result<RequestBuilder<T>, Error> {
        let req = self.request()?;
        if path.is_empty() {
            return Ok(req);
        }
        Ok(req.get_with(path, params))
    }
}
