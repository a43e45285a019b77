//! TB-032: Cross-graph references.
//!
//! [`AscendingReference`] carries a cloud reference into the provisioning
//! graph, where it resolves to an input variable. [`DescendingReference`]
//! carries a provisioning placeholder into the cloud graph, where it resolves
//! to an attribute of the deployer resource once that exists.

use super::diagnostics::{self, DiagnosticKind};
use crate::cloud::resolve::{CloudResolvable, Reference, ResolveContext, TypeHint};
use crate::core::error::{BridgeError, Result};
use crate::core::tokens::token_number;
use crate::terraform::resolve::{self as tf_resolve, TfResolvable, TfResolveContext};
use crate::terraform::{stack_of, TerraformVariable, TfNode, VariableConfig};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Value of a descending reference before the deployer exists.
pub const UNDETERMINED: &str = "<undetermined>";

/// Sequence number of `token`, or `undefined` with a diagnostic.
fn sequence_suffix(token: &str) -> String {
    match token_number(token) {
        Some(n) => n.to_string(),
        None => {
            diagnostics::warn(
                DiagnosticKind::TokenNumberMissing,
                format!("Failed to detect token number from token {}", token),
            );
            "undefined".to_string()
        }
    }
}

/// Terraform type expression for a hint.
pub fn terraform_type(hint: TypeHint) -> &'static str {
    match hint {
        TypeHint::Number => "number",
        TypeHint::String => "string",
        TypeHint::StringList => "list(string)",
    }
}

/// A cloud reference used inside the provisioning graph.
pub struct AscendingReference {
    reference: Rc<Reference>,
    tf_variable_name: String,
    /// Stack the variable was declared in, and the variable's value token.
    cache: RefCell<Option<(Rc<TfNode>, Value)>>,
}

impl AscendingReference {
    pub fn new(reference: Rc<Reference>) -> Self {
        let suffix = sequence_suffix(&reference.token());
        let tf_variable_name = format!("cdk-{}-{}", reference.display_name(), suffix);
        Self {
            reference,
            tf_variable_name,
            cache: RefCell::new(None),
        }
    }

    pub fn reference(&self) -> &Rc<Reference> {
        &self.reference
    }

    pub fn tf_variable_name(&self) -> &str {
        &self.tf_variable_name
    }

    /// Token string of the wrapped cloud reference.
    pub fn cloud_token(&self) -> String {
        self.reference.token()
    }
}

impl TfResolvable for AscendingReference {
    fn resolve(&self, ctx: &TfResolveContext) -> Result<Value> {
        let stack = stack_of(&ctx.scope)?;
        if let Some((owner, value)) = &*self.cache.borrow() {
            if Rc::ptr_eq(owner, &stack) {
                return Ok(value.clone());
            }
            return Err(BridgeError::ScopeMismatch {
                variable: self.tf_variable_name.clone(),
                first: owner.path(),
                second: stack.path(),
            });
        }

        let variable = TerraformVariable::new(
            &stack,
            &self.tf_variable_name,
            VariableConfig {
                var_type: self.reference.type_hint().map(|h| terraform_type(h).to_string()),
                nullable: Some(false),
                ..Default::default()
            },
        )?;
        let value = Value::String(variable.value()?);
        *self.cache.borrow_mut() = Some((stack, value.clone()));
        Ok(value)
    }
}

impl fmt::Display for AscendingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

/// A provisioning placeholder used inside the cloud graph.
pub struct DescendingReference {
    resolvable: Rc<dyn TfResolvable>,
    tf_output_name: String,
    value: RefCell<Option<Value>>,
}

impl DescendingReference {
    pub fn new(resolvable: Rc<dyn TfResolvable>) -> Self {
        let token = tf_resolve::as_string(Rc::clone(&resolvable));
        let tf_output_name = format!("cdk-out-{}", sequence_suffix(&token));
        Self {
            resolvable,
            tf_output_name,
            value: RefCell::new(None),
        }
    }

    pub fn resolvable(&self) -> &Rc<dyn TfResolvable> {
        &self.resolvable
    }

    pub fn tf_output_name(&self) -> &str {
        &self.tf_output_name
    }

    /// Token string of the wrapped provisioning placeholder.
    pub fn tf_token(&self) -> String {
        tf_resolve::as_string(Rc::clone(&self.resolvable))
    }

    pub fn set_value(&self, value: Value) {
        *self.value.borrow_mut() = Some(value);
    }

    pub fn value(&self) -> Option<Value> {
        self.value.borrow().clone()
    }
}

impl CloudResolvable for DescendingReference {
    fn resolve(&self, _ctx: &ResolveContext) -> Result<Value> {
        Ok(self
            .value
            .borrow()
            .clone()
            .unwrap_or_else(|| Value::String(UNDETERMINED.to_string())))
    }
}

impl fmt::Display for DescendingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tf_token())
    }
}
