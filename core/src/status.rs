//! Status-code-name table and per-response status flags.
//!
//! # Design
//! The table lives in `status_codes.json` (code as string key, camel-case
//! name as value), is embedded at compile time and parsed exactly once on
//! first access. It is never mutated afterwards, so concurrent readers need
//! no synchronization beyond the one-time initialization.
//!
//! A malformed table is a build defect, not a runtime condition: the first
//! access panics and every later access would too.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

static TABLE_SOURCE: &str = include_str!("../status_codes.json");

static STATUS_CODES: Lazy<Vec<(u16, String)>> = Lazy::new(|| {
    let raw: BTreeMap<String, String> =
        serde_json::from_str(TABLE_SOURCE).expect("status_codes.json must be a JSON object of strings");
    let mut table: Vec<(u16, String)> = raw
        .into_iter()
        .map(|(code, name)| {
            let code = code
                .parse::<u16>()
                .unwrap_or_else(|_| panic!("status_codes.json key {code:?} is not a status code"));
            (code, name)
        })
        .collect();
    table.sort_by_key(|(code, _)| *code);
    table
});

/// Canonical name for a status code, e.g. `404 -> "notFound"`.
pub fn name(code: u16) -> Option<&'static str> {
    let table: &'static [(u16, String)] = &STATUS_CODES;
    table
        .binary_search_by_key(&code, |(c, _)| *c)
        .ok()
        .map(|idx| table[idx].1.as_str())
}

/// Every known canonical name, in ascending status-code order.
pub fn names() -> impl Iterator<Item = &'static str> {
    let table: &'static [(u16, String)] = &STATUS_CODES;
    table.iter().map(|(_, name)| name.as_str())
}

/// One boolean per known status name; at most one of them is `true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFlags {
    flags: Vec<(&'static str, bool)>,
}

impl StatusFlags {
    pub fn for_code(code: u16) -> Self {
        let table: &'static [(u16, String)] = &STATUS_CODES;
        let flags = table
            .iter()
            .map(|(c, name)| (name.as_str(), *c == code))
            .collect();
        Self { flags }
    }

    /// Flag for a canonical name. Unknown names read as `false`.
    pub fn get(&self, name: &str) -> bool {
        self.flags
            .iter()
            .find(|(n, _)| *n == name)
            .is_some_and(|(_, set)| *set)
    }

    /// The name whose flag is set, if the code is in the table.
    pub fn matched(&self) -> Option<&'static str> {
        self.flags.iter().find(|(_, set)| *set).map(|(name, _)| *name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.flags.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
