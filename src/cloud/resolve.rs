//! TB-010: Cloud-graph tokens and the native resolver.
//!
//! Placeholders implement [`CloudResolvable`] and live in a thread-local
//! [`TokenMap`] with the `${Token[...]}` syntax. Resolution is recursive: a
//! token's value may itself carry tokens. String concatenation that involves
//! non-string values renders as `Fn::Join`.

use super::elements::{logical_id, CloudNode};
use crate::core::error::{BridgeError, Result};
use crate::core::tokens::{Fragment, TokenMap};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Resolution stops with an error past this nesting depth.
pub const MAX_DEPTH: usize = 64;

/// A deferred value of the cloud graph.
pub trait CloudResolvable: Any {
    fn resolve(&self, ctx: &ResolveContext) -> Result<Value>;
}

/// Scope and mode of one resolution pass.
#[derive(Clone)]
pub struct ResolveContext {
    pub scope: Rc<CloudNode>,
    pub preparing: bool,
}

thread_local! {
    static TOKENS: RefCell<TokenMap<dyn CloudResolvable>> = RefCell::new(TokenMap::new("Token"));
    static REFERENCES: RefCell<HashMap<(usize, String), Rc<Reference>>> = RefCell::new(HashMap::new());
}

/// Forget every cloud placeholder and reference singleton on this thread.
pub(crate) fn clear_registry() {
    TOKENS.with(|t| *t.borrow_mut() = TokenMap::new("Token"));
    REFERENCES.with(|r| r.borrow_mut().clear());
}

/// Encode a placeholder as a string (`${Token[TOKEN.n]}`).
pub fn as_string(token: Rc<dyn CloudResolvable>) -> String {
    TOKENS.with(|t| t.borrow_mut().register(&token, None))
}

/// Encode a placeholder with a display hint (`${Token[<hint>.n]}`).
pub fn as_string_with_hint(token: Rc<dyn CloudResolvable>, hint: &str) -> String {
    TOKENS.with(|t| t.borrow_mut().register(&token, Some(hint)))
}

/// Whether `s` contains cloud tokens.
pub fn is_unresolved(s: &str) -> bool {
    TOKENS.with(|t| t.borrow().is_unresolved(s))
}

/// Split a string into literal and token fragments.
pub fn reverse_string(s: &str) -> Result<Vec<Fragment<dyn CloudResolvable>>> {
    TOKENS.with(|t| t.borrow().split(s))
}

/// Downcast a placeholder to a concrete type.
pub fn downcast<T: CloudResolvable>(token: &Rc<dyn CloudResolvable>) -> Option<Rc<T>> {
    let any: Rc<dyn Any> = token.clone();
    any.downcast::<T>().ok()
}

// ============================================================================
// References and intrinsics
// ============================================================================

/// Classification of a reference's value, carried across to input declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    String,
    Number,
    StringList,
}

#[derive(Clone)]
enum Target {
    Element { node: Rc<CloudNode>, attribute: String },
    Pseudo(String),
}

/// A `Ref` / `Fn::GetAtt` pointing at an element or a pseudo parameter.
pub struct Reference {
    display_name: String,
    type_hint: Option<TypeHint>,
    target: Target,
}

impl Reference {
    /// Singleton reference to `attribute` of `node` (`"Ref"` for `{"Ref": ...}`).
    pub fn for_element(node: &Rc<CloudNode>, attribute: &str, type_hint: Option<TypeHint>) -> Rc<Self> {
        let key = (Rc::as_ptr(node) as usize, attribute.to_string());
        REFERENCES.with(|refs| {
            Rc::clone(refs.borrow_mut().entry(key).or_insert_with(|| {
                Rc::new(Self {
                    display_name: attribute.to_string(),
                    type_hint,
                    target: Target::Element {
                        node: Rc::clone(node),
                        attribute: attribute.to_string(),
                    },
                })
            }))
        })
    }

    /// Singleton reference to a pseudo parameter such as `AWS::Region`.
    pub fn pseudo(name: &str) -> Rc<Self> {
        let key = (0usize, name.to_string());
        REFERENCES.with(|refs| {
            Rc::clone(refs.borrow_mut().entry(key).or_insert_with(|| {
                Rc::new(Self {
                    display_name: name.to_string(),
                    type_hint: Some(TypeHint::String),
                    target: Target::Pseudo(name.to_string()),
                })
            }))
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn type_hint(&self) -> Option<TypeHint> {
        self.type_hint
    }

    /// The token string of this reference.
    pub fn token(self: &Rc<Self>) -> String {
        as_string(Rc::clone(self) as Rc<dyn CloudResolvable>)
    }
}

impl CloudResolvable for Reference {
    fn resolve(&self, _ctx: &ResolveContext) -> Result<Value> {
        Ok(match &self.target {
            Target::Pseudo(name) => json!({ "Ref": name }),
            Target::Element { node, attribute } if attribute == "Ref" => {
                json!({ "Ref": logical_id(node)? })
            }
            Target::Element { node, attribute } => {
                json!({ "Fn::GetAtt": [logical_id(node)?, attribute] })
            }
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = TOKENS.with(|t| t.borrow().rendered_for(self as *const Self as *const ()));
        match token {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "Reference({})", self.display_name),
        }
    }
}

/// Any literal CloudFormation expression, e.g. an `Fn::Sub`.
pub struct Intrinsic {
    value: Value,
}

impl Intrinsic {
    pub fn token(value: Value) -> String {
        as_string(Rc::new(Self { value }))
    }
}

impl CloudResolvable for Intrinsic {
    fn resolve(&self, _ctx: &ResolveContext) -> Result<Value> {
        Ok(self.value.clone())
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Hook points of a resolution pass.
pub trait TokenResolver {
    /// Produce the raw value of one token. The engine resolves the result again.
    fn resolve_token(&mut self, token: &Rc<dyn CloudResolvable>, ctx: &ResolveContext) -> Result<Value> {
        token.resolve(ctx)
    }

    /// Combine the resolved fragments of one string.
    fn join(&mut self, parts: Vec<Value>) -> Value {
        join_parts(parts)
    }
}

/// The native behaviour with no extra bookkeeping.
pub struct DefaultTokenResolver;

impl TokenResolver for DefaultTokenResolver {}

/// Resolve every token in `value`.
pub fn resolve(value: &Value, ctx: &ResolveContext, resolver: &mut dyn TokenResolver) -> Result<Value> {
    resolve_at(value, ctx, resolver, 0)
}

fn resolve_at(
    value: &Value,
    ctx: &ResolveContext,
    resolver: &mut dyn TokenResolver,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::ResolutionDepth(MAX_DEPTH));
    }
    match value {
        Value::String(s) => {
            if !is_unresolved(s) {
                return Ok(value.clone());
            }
            let fragments = reverse_string(s)?;
            if let [Fragment::Token(token)] = fragments.as_slice() {
                return resolve_token_at(token, ctx, resolver, depth);
            }
            let mut parts = Vec::with_capacity(fragments.len());
            for fragment in &fragments {
                match fragment {
                    Fragment::Literal(l) => parts.push(Value::String(l.clone())),
                    Fragment::Token(token) => parts.push(resolve_token_at(token, ctx, resolver, depth)?),
                }
            }
            Ok(resolver.join(parts))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_at(v, ctx, resolver, depth + 1))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_at(v, ctx, resolver, depth + 1)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_token_at(
    token: &Rc<dyn CloudResolvable>,
    ctx: &ResolveContext,
    resolver: &mut dyn TokenResolver,
    depth: usize,
) -> Result<Value> {
    let raw = resolver.resolve_token(token, ctx)?;
    resolve_at(&raw, ctx, resolver, depth + 1)
}

/// Concatenate resolved fragments: plain string when possible, else `Fn::Join`.
pub fn join_parts(parts: Vec<Value>) -> Value {
    let mut merged: Vec<Value> = Vec::new();
    for part in parts {
        let pieces = match part {
            Value::Object(ref obj) if is_empty_join(obj) => obj["Fn::Join"][1]
                .as_array()
                .cloned()
                .unwrap_or_default(),
            other => vec![other],
        };
        for piece in pieces {
            match (merged.last_mut(), piece) {
                (Some(Value::String(prev)), Value::String(next)) => prev.push_str(&next),
                (_, piece) => merged.push(piece),
            }
        }
    }
    match merged.len() {
        0 => Value::String(String::new()),
        1 if merged[0].is_string() => merged.remove(0),
        _ => json!({ "Fn::Join": ["", merged] }),
    }
}

fn is_empty_join(obj: &Map<String, Value>) -> bool {
    obj.len() == 1 && obj.get("Fn::Join").and_then(|j| j.get(0)) == Some(&Value::String(String::new()))
}
