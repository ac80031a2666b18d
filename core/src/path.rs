//! Path-template compiler for `:name` style placeholders.
//!
//! `/user/:id` compiles to a literal `/user/` followed by the parameter
//! `id`. A trailing `?` (`/user/:id?`) makes the parameter optional; when it
//! is absent the parameter and the `/` in front of it are dropped. A `.`
//! works as a prefix too, so `/file.:ext?` renders as `/file` or `/file.png`.
//! Substituted values are percent-encoded like `encodeURIComponent`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::error::Error;

/// Characters `encodeURIComponent` leaves alone.
pub(crate) const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param {
        name: String,
        prefix: Option<char>,
        optional: bool,
    },
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    tokens: Vec<Token>,
}

impl PathTemplate {
    pub fn compile(template: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    literal.push(escaped);
                }
                continue;
            }
            if c != ':' {
                literal.push(c);
                continue;
            }

            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                literal.push(':');
                continue;
            }

            let optional = chars.next_if_eq(&'?').is_some();
            let prefix = match literal.chars().last() {
                Some(c @ ('/' | '.')) => {
                    literal.pop();
                    Some(c)
                }
                _ => None,
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Param {
                name,
                prefix,
                optional,
            });
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Self { tokens }
    }

    /// Parameter names in template order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Param { name, .. } => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    pub fn render(&self, params: &Map<String, Value>) -> Result<String, Error> {
        let mut path = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => path.push_str(text),
                Token::Param {
                    name,
                    prefix,
                    optional,
                } => {
                    let value = match params.get(name) {
                        None | Some(Value::Null) if *optional => continue,
                        None | Some(Value::Null) => return Err(Error::MissingPathParam(name.clone())),
                        Some(value) => value,
                    };
                    let segment = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => return Err(Error::InvalidPathParam { name: name.clone() }),
                    };
                    if let Some(prefix) = prefix {
                        path.push(*prefix);
                    }
                    path.extend(utf8_percent_encode(&segment, COMPONENT));
                }
            }
        }
        Ok(path)
    }
}
