//! Cookie jar shared between a caller and the transport.
//!
//! A jar is a cheap cloneable handle; every clone sees the same cookies.
//! Cookies are kept by name only (no domain or path matching), which is
//! enough for a builder bound to a single base host. `Max-Age` and
//! `Expires` are honoured: an expired cookie is removed or never sent.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cookie::time::OffsetDateTime;
use cookie::Cookie;
use tracing::debug;

#[derive(Debug, Clone)]
struct Stored {
    value: String,
    expires: Option<OffsetDateTime>,
}

impl Stored {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Arc<Mutex<BTreeMap<String, Stored>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cookie from a `Set-Cookie` header value.
    ///
    /// A cookie that is already expired (`Max-Age=0`, a past `Expires`)
    /// removes any stored cookie of the same name. Unparsable values are
    /// ignored.
    pub fn set_cookie(&self, header: &str) {
        let cookie = match Cookie::parse(header) {
            Ok(cookie) => cookie,
            Err(err) => {
                debug!(%err, "ignoring malformed set-cookie");
                return;
            }
        };
        let name = cookie.name().trim();
        if name.is_empty() {
            return;
        }

        let now = OffsetDateTime::now_utc();
        // Max-Age takes precedence over Expires.
        let expires = match cookie.max_age() {
            Some(max_age) => Some(now + max_age),
            None => cookie.expires_datetime(),
        };
        let stored = Stored {
            value: cookie.value().to_string(),
            expires,
        };

        let mut cookies = self.lock();
        if stored.is_live(now) {
            cookies.insert(name.to_string(), stored);
        } else {
            cookies.remove(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        self.lock()
            .get(name)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone())
    }

    pub fn is_empty(&self) -> bool {
        let now = OffsetDateTime::now_utc();
        !self.lock().values().any(|stored| stored.is_live(now))
    }

    /// Value for a `Cookie` request header: `a=1; b=2`.
    pub fn cookie_string(&self) -> String {
        let now = OffsetDateTime::now_utc();
        self.lock()
            .iter()
            .filter(|(_, stored)| stored.is_live(now))
            .map(|(name, stored)| Cookie::new(name.as_str(), stored.value.as_str()).to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Stored>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
