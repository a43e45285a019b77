//! TB-031: Recording resolvers — find every placeholder a value reaches.
//!
//! Each wraps the graph's default resolver, remembers each token passed to
//! `resolve_token` (first-seen order, identity dedup) and runs the native
//! engine with `preparing = true`.

use crate::cloud::resolve::{
    self as cloud_resolve, CloudResolvable, DefaultTokenResolver, ResolveContext, TokenResolver,
};
use crate::cloud::CloudNode;
use crate::core::error::Result;
use crate::core::tokens::identity;
use crate::terraform::resolve::{
    self as tf_resolve, DefaultTfResolver, TfResolvable, TfResolveContext, TfTokenResolver,
};
use crate::terraform::TfNode;
use serde_json::Value;
use std::collections::HashSet;
use std::rc::Rc;

/// Ordered set of placeholders keyed by identity.
struct Recorded<R: ?Sized> {
    seen: HashSet<*const ()>,
    tokens: Vec<Rc<R>>,
}

impl<R: ?Sized> Recorded<R> {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            tokens: Vec::new(),
        }
    }

    fn record(&mut self, token: &Rc<R>) {
        if self.seen.insert(identity(token)) {
            self.tokens.push(Rc::clone(token));
        }
    }
}

struct RecordingCloudResolver {
    inner: DefaultTokenResolver,
    recorded: Recorded<dyn CloudResolvable>,
}

impl TokenResolver for RecordingCloudResolver {
    fn resolve_token(&mut self, token: &Rc<dyn CloudResolvable>, ctx: &ResolveContext) -> Result<Value> {
        self.recorded.record(token);
        self.inner.resolve_token(token, ctx)
    }

    fn join(&mut self, parts: Vec<Value>) -> Value {
        self.inner.join(parts)
    }
}

struct RecordingTfResolver {
    inner: DefaultTfResolver,
    recorded: Recorded<dyn TfResolvable>,
}

impl TfTokenResolver for RecordingTfResolver {
    fn resolve_token(&mut self, token: &Rc<dyn TfResolvable>, ctx: &TfResolveContext) -> Result<Value> {
        self.recorded.record(token);
        self.inner.resolve_token(token, ctx)
    }

    fn join(&mut self, parts: Vec<Value>) -> Value {
        self.inner.join(parts)
    }
}

/// Every cloud placeholder reachable from `value`.
pub fn find_cloud_tokens(scope: &Rc<CloudNode>, value: &Value) -> Result<Vec<Rc<dyn CloudResolvable>>> {
    let mut resolver = RecordingCloudResolver {
        inner: DefaultTokenResolver,
        recorded: Recorded::new(),
    };
    let ctx = ResolveContext {
        scope: Rc::clone(scope),
        preparing: true,
    };
    cloud_resolve::resolve(value, &ctx, &mut resolver)?;
    Ok(resolver.recorded.tokens)
}

/// Every provisioning placeholder reachable from `value`.
pub fn find_tf_tokens(scope: &Rc<TfNode>, value: &Value) -> Result<Vec<Rc<dyn TfResolvable>>> {
    let mut resolver = RecordingTfResolver {
        inner: DefaultTfResolver,
        recorded: Recorded::new(),
    };
    let ctx = TfResolveContext {
        scope: Rc::clone(scope),
        preparing: true,
    };
    tf_resolve::resolve(value, &ctx, &mut resolver)?;
    Ok(resolver.recorded.tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::resolve::Reference;
    use crate::cloud::{CfnParameter, CloudApp, Parameter, Resource, Stack, StackProps};
    use crate::core::error::BridgeError;
    use crate::terraform::{TerraformResource, TerraformStack, TfApp};
    use serde_json::json;

    #[test]
    fn test_tb031_cloud_tokens_in_order_once() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let a = Parameter::new(&stack, "A", CfnParameter::new("String")).unwrap();
        let b = Resource::new(&stack, "B", "AWS::SNS::Topic", json!({})).unwrap();
        let value = json!({
            "x": [b.ref_token(), a.value_as_string()],
            "y": format!("{}-{}", a.value_as_string(), b.ref_token()),
        });
        let found = find_cloud_tokens(&stack, &value).unwrap();
        assert_eq!(found.len(), 2);
        let first = cloud_resolve::downcast::<Reference>(&found[0]).unwrap();
        assert!(Rc::ptr_eq(&first, &Reference::for_element(b.node(), "Ref", None)));
    }

    #[test]
    fn test_tb031_tokens_inside_serialized_json() {
        let app = TfApp::new(&std::env::temp_dir());
        let stack = TerraformStack::new(&app, "tf").unwrap();
        let r = TerraformResource::new(&stack, "r", "null_resource", json!({})).unwrap();
        let doc = json!({ "policy": json!({ "arn": r.get_string_attribute("id") }).to_string() });
        let found = find_tf_tokens(&stack, &json!(doc.to_string())).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_tb031_no_tokens() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        assert!(find_cloud_tokens(&stack, &json!({ "a": ["b", 1, null] })).unwrap().is_empty());
    }

    #[test]
    fn test_tb031_errors_propagate() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let err = find_cloud_tokens(&stack, &json!("${Token[TOKEN.999999]}")).err().unwrap();
        assert!(matches!(err, BridgeError::UnknownToken(_)));
    }
}
