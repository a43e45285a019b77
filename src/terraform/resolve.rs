//! TB-020: Provisioning-graph tokens and the native resolver.
//!
//! Same engine shape as the cloud graph, with the `${TfToken[...]}` syntax.
//! Concatenation is plain string interpolation: every token resolves to a
//! `"${...}"` expression string.

use super::elements::{logical_id, TfNode};
use crate::core::error::{BridgeError, Result};
use crate::core::tokens::{Fragment, TokenMap};
use serde_json::{Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub use crate::cloud::resolve::MAX_DEPTH;

/// A deferred value of the provisioning graph.
pub trait TfResolvable: Any {
    fn resolve(&self, ctx: &TfResolveContext) -> Result<Value>;
}

/// Scope and mode of one resolution pass.
#[derive(Clone)]
pub struct TfResolveContext {
    pub scope: Rc<TfNode>,
    pub preparing: bool,
}

thread_local! {
    static TOKENS: RefCell<TokenMap<dyn TfResolvable>> = RefCell::new(TokenMap::new("TfToken"));
    static ATTRIBUTES: RefCell<HashMap<(usize, String), Rc<dyn TfResolvable>>> = RefCell::new(HashMap::new());
}

pub(crate) fn clear_registry() {
    TOKENS.with(|t| *t.borrow_mut() = TokenMap::new("TfToken"));
    ATTRIBUTES.with(|a| a.borrow_mut().clear());
}

/// Encode a placeholder as a string (`${TfToken[TOKEN.n]}`).
pub fn as_string(token: Rc<dyn TfResolvable>) -> String {
    TOKENS.with(|t| t.borrow_mut().register(&token, None))
}

/// Encode a placeholder with a display hint.
pub fn as_string_with_hint(token: Rc<dyn TfResolvable>, hint: &str) -> String {
    TOKENS.with(|t| t.borrow_mut().register(&token, Some(hint)))
}

/// Token string of an already registered placeholder.
pub fn token_of(token: &Rc<dyn TfResolvable>) -> Option<String> {
    TOKENS.with(|t| t.borrow().rendered_for(Rc::as_ptr(token) as *const ()))
}

pub fn is_unresolved(s: &str) -> bool {
    TOKENS.with(|t| t.borrow().is_unresolved(s))
}

pub fn reverse_string(s: &str) -> Result<Vec<Fragment<dyn TfResolvable>>> {
    TOKENS.with(|t| t.borrow().split(s))
}

pub fn downcast<T: TfResolvable>(token: &Rc<dyn TfResolvable>) -> Option<Rc<T>> {
    let any: Rc<dyn Any> = token.clone();
    any.downcast::<T>().ok()
}

/// A literal Terraform expression such as `var.region`.
pub struct TfExpression {
    expression: String,
}

impl TfExpression {
    pub fn new(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
        }
    }

    pub fn token(expression: &str) -> String {
        as_string(Rc::new(Self::new(expression)))
    }
}

impl TfResolvable for TfExpression {
    fn resolve(&self, _ctx: &TfResolveContext) -> Result<Value> {
        Ok(Value::String(format!("${{{}}}", self.expression)))
    }
}

/// `<type>.<logical id>.<attribute>` of a resource, named lazily.
struct Attribute {
    node: Rc<TfNode>,
    resource_type: String,
    attribute: String,
}

impl TfResolvable for Attribute {
    fn resolve(&self, _ctx: &TfResolveContext) -> Result<Value> {
        Ok(Value::String(format!(
            "${{{}.{}.{}}}",
            self.resource_type,
            logical_id(&self.node)?,
            self.attribute
        )))
    }
}

/// Singleton attribute token of a resource node.
pub(crate) fn attribute_token(node: &Rc<TfNode>, resource_type: &str, attribute: &str) -> String {
    let key = (Rc::as_ptr(node) as usize, attribute.to_string());
    let token = ATTRIBUTES.with(|attrs| {
        Rc::clone(attrs.borrow_mut().entry(key).or_insert_with(|| {
            Rc::new(Attribute {
                node: Rc::clone(node),
                resource_type: resource_type.to_string(),
                attribute: attribute.to_string(),
            }) as Rc<dyn TfResolvable>
        }))
    });
    as_string(token)
}

/// Hook points of a resolution pass.
pub trait TfTokenResolver {
    fn resolve_token(&mut self, token: &Rc<dyn TfResolvable>, ctx: &TfResolveContext) -> Result<Value> {
        token.resolve(ctx)
    }

    fn join(&mut self, parts: Vec<Value>) -> Value {
        interpolate(parts)
    }
}

pub struct DefaultTfResolver;

impl TfTokenResolver for DefaultTfResolver {}

/// Resolve every token in `value`.
pub fn resolve(value: &Value, ctx: &TfResolveContext, resolver: &mut dyn TfTokenResolver) -> Result<Value> {
    resolve_at(value, ctx, resolver, 0)
}

fn resolve_at(
    value: &Value,
    ctx: &TfResolveContext,
    resolver: &mut dyn TfTokenResolver,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(BridgeError::ResolutionDepth(MAX_DEPTH));
    }
    match value {
        Value::String(s) if is_unresolved(s) => {
            let fragments = reverse_string(s)?;
            if let [Fragment::Token(token)] = fragments.as_slice() {
                let raw = resolver.resolve_token(token, ctx)?;
                return resolve_at(&raw, ctx, resolver, depth + 1);
            }
            let mut parts = Vec::with_capacity(fragments.len());
            for fragment in &fragments {
                match fragment {
                    Fragment::Literal(l) => parts.push(Value::String(l.clone())),
                    Fragment::Token(token) => {
                        let raw = resolver.resolve_token(token, ctx)?;
                        parts.push(resolve_at(&raw, ctx, resolver, depth + 1)?);
                    }
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

/// String interpolation of resolved fragments.
pub fn interpolate(parts: Vec<Value>) -> Value {
    let mut out = String::new();
    for part in parts {
        match part {
            Value::String(s) => out.push_str(&s),
            other => out.push_str(&other.to_string()),
        }
    }
    Value::String(out)
}
