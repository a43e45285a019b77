//! TB-003: Token map — deferred placeholders encoded inside strings.
//!
//! Each graph owns one `TokenMap` (thread-local, see `cloud::resolve` and
//! `terraform::resolve`). A registered placeholder is rendered as
//! `${<Marker>[<hint>.<n>]}` where `<n>` is a per-map sequence number and
//! `<hint>` is `TOKEN` unless a display hint was given. Registration is keyed
//! on object identity, so the same `Rc` always yields the same string.

use super::error::{BridgeError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::LazyLock;

/// Hint used when a token is registered without a display hint.
pub const DEFAULT_HINT: &str = "TOKEN";

const END: &str = "]}";

static TOKEN_NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\[TOKEN\.(\d+)\]").ok());

/// A piece of a tokenized string.
pub enum Fragment<R: ?Sized> {
    Literal(String),
    Token(Rc<R>),
}

impl<R: ?Sized> Clone for Fragment<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Literal(s) => Self::Literal(s.clone()),
            Self::Token(t) => Self::Token(Rc::clone(t)),
        }
    }
}

/// Identity key of a registered object.
pub fn identity<R: ?Sized>(token: &Rc<R>) -> *const () {
    Rc::as_ptr(token) as *const ()
}

/// Registry of placeholders for one graph.
pub struct TokenMap<R: ?Sized> {
    begin: String,
    counter: u64,
    by_key: HashMap<String, Rc<R>>,
    by_identity: HashMap<*const (), String>,
}

impl<R: ?Sized> TokenMap<R> {
    /// `marker` is the word inside the token syntax, e.g. `Token` or `TfToken`.
    pub fn new(marker: &str) -> Self {
        Self {
            begin: format!("${{{}[", marker),
            counter: 0,
            by_key: HashMap::new(),
            by_identity: HashMap::new(),
        }
    }

    /// Register a placeholder and return its string form.
    pub fn register(&mut self, token: &Rc<R>, display_hint: Option<&str>) -> String {
        if let Some(existing) = self.by_identity.get(&identity(token)) {
            return existing.clone();
        }
        self.counter += 1;
        let hint = display_hint.map(sanitize_hint).unwrap_or_else(|| DEFAULT_HINT.to_string());
        let key = format!("{}.{}", hint, self.counter);
        let rendered = format!("{}{}{}", self.begin, key, END);
        self.by_key.insert(key, Rc::clone(token));
        self.by_identity.insert(identity(token), rendered.clone());
        rendered
    }

    /// Look up a full token string, e.g. `${Token[TOKEN.3]}`.
    pub fn lookup(&self, s: &str) -> Option<Rc<R>> {
        let key = s.strip_prefix(self.begin.as_str())?.strip_suffix(END)?;
        self.by_key.get(key).cloned()
    }

    /// String form of an already registered object, by identity.
    pub fn rendered_for(&self, ptr: *const ()) -> Option<String> {
        self.by_identity.get(&ptr).cloned()
    }

    /// Whether `s` carries at least one token of this map's syntax.
    pub fn is_unresolved(&self, s: &str) -> bool {
        s.find(self.begin.as_str())
            .is_some_and(|open| s[open..].contains(END))
    }

    /// Split a string into literal and token fragments.
    pub fn split(&self, s: &str) -> Result<Vec<Fragment<R>>> {
        let mut fragments: Vec<Fragment<R>> = Vec::new();
        let mut literal = String::new();
        let mut rest = s;

        while let Some(open) = rest.find(self.begin.as_str()) {
            let after = &rest[open + self.begin.len()..];
            let Some(close) = after.find(END) else {
                break;
            };
            let key = &after[..close];
            let token = self.by_key.get(key).ok_or_else(|| {
                BridgeError::UnknownToken(format!("{}{}{}", self.begin, key, END))
            })?;
            literal.push_str(&rest[..open]);
            if !literal.is_empty() {
                fragments.push(Fragment::Literal(std::mem::take(&mut literal)));
            }
            fragments.push(Fragment::Token(Rc::clone(token)));
            rest = &after[close + END.len()..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            fragments.push(Fragment::Literal(literal));
        }
        Ok(fragments)
    }

    /// Number of registered placeholders.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

fn sanitize_hint(hint: &str) -> String {
    hint.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Extract the sequence number from a default-hinted token (`[TOKEN.<n>]`).
/// Display-hinted tokens have no such marker and yield `None`.
pub fn token_number(s: &str) -> Option<u64> {
    TOKEN_NUMBER.as_ref()?.captures(s)?.get(1)?.as_str().parse().ok()
}
