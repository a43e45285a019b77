//! TB-033: `ascend` / `descend` — re-encode a token string for the other graph.
//!
//! Wrappers are memoized by the identity of the placeholder they wrap, so
//! converting the same placeholder twice yields the same reference object
//! (and therefore the same variable/output name).

use super::reference::{AscendingReference, DescendingReference};
use crate::cloud::resolve::{self as cloud_resolve, CloudResolvable, Reference};
use crate::core::error::Result;
use crate::core::tokens::{identity, Fragment};
use crate::terraform::resolve::{self as tf_resolve, TfResolvable};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

thread_local! {
    static ASCENDING: RefCell<HashMap<*const (), Rc<AscendingReference>>> = RefCell::new(HashMap::new());
    static DESCENDING: RefCell<HashMap<*const (), Rc<DescendingReference>>> = RefCell::new(HashMap::new());
}

/// Drop every placeholder, reference singleton and cross-graph wrapper
/// registered on this thread. Token strings produced earlier stop resolving
/// and numbering starts over.
pub fn reset_registries() {
    ASCENDING.with(|m| m.borrow_mut().clear());
    DESCENDING.with(|m| m.borrow_mut().clear());
    cloud_resolve::clear_registry();
    tf_resolve::clear_registry();
}

/// The ascending wrapper of `reference`, created on first use.
pub fn ascending_for(reference: &Rc<Reference>) -> Rc<AscendingReference> {
    let key = identity(reference);
    if let Some(existing) = ASCENDING.with(|m| m.borrow().get(&key).cloned()) {
        return existing;
    }
    let created = Rc::new(AscendingReference::new(Rc::clone(reference)));
    ASCENDING.with(|m| m.borrow_mut().insert(key, Rc::clone(&created)));
    created
}

/// The descending wrapper of `resolvable`, created on first use.
pub fn descending_for(resolvable: &Rc<dyn TfResolvable>) -> Rc<DescendingReference> {
    let key = identity(resolvable);
    if let Some(existing) = DESCENDING.with(|m| m.borrow().get(&key).cloned()) {
        return existing;
    }
    let created = Rc::new(DescendingReference::new(Rc::clone(resolvable)));
    DESCENDING.with(|m| m.borrow_mut().insert(key, Rc::clone(&created)));
    created
}

/// Cloud token string to provisioning token string.
///
/// Cloud references become ascending references; any other cloud token is
/// left in place.
pub fn ascend(value: &str) -> Result<String> {
    if !cloud_resolve::is_unresolved(value) {
        return Ok(value.to_string());
    }
    let mut out = String::new();
    for fragment in cloud_resolve::reverse_string(value)? {
        match fragment {
            Fragment::Literal(l) => out.push_str(&l),
            Fragment::Token(token) => match cloud_resolve::downcast::<Reference>(&token) {
                Some(reference) => {
                    let wrapped: Rc<dyn TfResolvable> = ascending_for(&reference);
                    out.push_str(&tf_resolve::as_string(wrapped));
                }
                None => out.push_str(&cloud_resolve::as_string(token)),
            },
        }
    }
    Ok(out)
}

/// Provisioning token string to cloud token string.
pub fn descend(value: &str) -> Result<String> {
    if !tf_resolve::is_unresolved(value) {
        return Ok(value.to_string());
    }
    let mut out = String::new();
    for fragment in tf_resolve::reverse_string(value)? {
        match fragment {
            Fragment::Literal(l) => out.push_str(&l),
            Fragment::Token(token) => {
                let wrapped: Rc<dyn CloudResolvable> = descending_for(&token);
                out.push_str(&cloud_resolve::as_string(wrapped));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CfnParameter, CloudApp, Parameter, Stack, StackProps};
    use crate::terraform::{TerraformResource, TerraformStack, TfApp};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_tb033_ascend_is_referentially_stable() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "aws", StackProps::default()).unwrap();
        let p = Parameter::new(&stack, "P", CfnParameter::new("String")).unwrap();
        let a1 = ascend(&p.value_as_string()).unwrap();
        let a2 = ascend(&p.value_as_string()).unwrap();
        assert_eq!(a1, a2);
        assert!(a1.starts_with("${TfToken["));
        let r = ascending_for(&p.value());
        assert!(r.tf_variable_name().starts_with("cdk-Ref-"));
        assert!(Rc::ptr_eq(&r, &ascending_for(&p.value())));
    }

    #[test]
    fn test_tb033_reset_forgets_tokens_and_wrappers() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "aws", StackProps::default()).unwrap();
        let p = Parameter::new(&stack, "P", CfnParameter::new("String")).unwrap();
        let before = ascending_for(&p.value());
        let token = p.value_as_string();

        reset_registries();

        let err = cloud_resolve::reverse_string(&token).err().unwrap();
        assert!(matches!(err, crate::core::error::BridgeError::UnknownToken(_)));
        assert!(!Rc::ptr_eq(&before, &ascending_for(&p.value())));
    }

    #[test]
    fn test_tb033_descend_is_referentially_stable() {
        let app = TfApp::new(&std::env::temp_dir());
        let stack = TerraformStack::new(&app, "tf").unwrap();
        let r = TerraformResource::new(&stack, "lb", "aws_lb", json!({})).unwrap();
        let d1 = descend(&r.get_string_attribute("dns_name")).unwrap();
        let d2 = descend(&r.get_string_attribute("dns_name")).unwrap();
        assert_eq!(d1, d2);
        assert!(d1.starts_with("${Token["));
    }

    #[test]
    fn test_tb033_mixed_string_keeps_literals() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "aws", StackProps::default()).unwrap();
        let p = Parameter::new(&stack, "P", CfnParameter::new("String")).unwrap();
        let s = format!("prefix-{}-suffix", p.value_as_string());
        let up = ascend(&s).unwrap();
        assert!(up.starts_with("prefix-${TfToken["));
        assert!(up.ends_with("]}-suffix"));
    }

    #[test]
    fn test_tb033_non_reference_cloud_tokens_stay() {
        let intrinsic = crate::cloud::resolve::Intrinsic::token(json!({ "Fn::Sub": "x" }));
        assert_eq!(ascend(&intrinsic).unwrap(), intrinsic);
    }

    #[test]
    fn test_tb033_cross_encoding_is_not_identity() {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "aws", StackProps::default()).unwrap();
        let p = Parameter::new(&stack, "P", CfnParameter::new("String")).unwrap();
        let x = p.value_as_string();
        assert_ne!(descend(&ascend(&x).unwrap()).unwrap(), x);
    }

    proptest! {
        #[test]
        fn prop_tb033_plain_strings_pass_through(s in "[a-zA-Z0-9 ._/:{}$-]{0,40}") {
            prop_assert_eq!(ascend(&s).unwrap(), s.clone());
            prop_assert_eq!(descend(&s).unwrap(), s);
        }
    }
}
