//! TB-011: Cloud-graph constructs — stacks, parameters, resources, outputs.
//!
//! Each element renders an unresolved template fragment via
//! [`to_cloudformation`]; the stack merges and resolves the fragments.

use super::app::{AppState, CloudApp};
use super::asset::AssetSource;
use super::resolve::{Reference, TypeHint};
use crate::core::construct::Node;
use crate::core::error::{BridgeError, Result};
use serde_json::{json, Map, Value};
use std::rc::Rc;

pub type CloudNode = Node<CloudKind>;

/// Payload of a cloud-graph construct.
pub enum CloudKind {
    App(AppState),
    Stack(StackProps),
    Parameter(CfnParameter),
    Resource(CfnResource),
    Output(CfnOutput),
    Asset(AssetSource),
    /// Plain grouping construct.
    Construct,
}

/// Environment of a stack. Unset fields render as pseudo parameters.
#[derive(Debug, Clone, Default)]
pub struct StackProps {
    pub region: Option<String>,
    pub account: Option<String>,
    pub description: Option<String>,
}

/// Template parameter declaration.
#[derive(Debug, Clone)]
pub struct CfnParameter {
    pub param_type: String,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub no_echo: bool,
}

impl CfnParameter {
    pub fn new(param_type: &str) -> Self {
        Self {
            param_type: param_type.to_string(),
            default: None,
            description: None,
            no_echo: false,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn type_hint(&self) -> TypeHint {
        let t = self.param_type.as_str();
        if t == "Number" {
            TypeHint::Number
        } else if t.starts_with("List<") || t == "CommaDelimitedList" {
            TypeHint::StringList
        } else {
            TypeHint::String
        }
    }
}

/// Raw resource declaration.
#[derive(Debug, Clone)]
pub struct CfnResource {
    pub resource_type: String,
    pub properties: Value,
    /// Render `DeletionPolicy`/`UpdateReplacePolicy: Retain`.
    pub retain: bool,
}

/// Template output declaration.
#[derive(Debug, Clone)]
pub struct CfnOutput {
    pub value: Value,
    pub description: Option<String>,
}

// ============================================================================
// Handles
// ============================================================================

/// Stack helpers. Stacks are plain nodes directly under the app root.
pub struct Stack;

impl Stack {
    pub fn new(app: &CloudApp, id: &str, props: StackProps) -> Result<Rc<CloudNode>> {
        app.node().add_child(id, CloudKind::Stack(props))
    }

    /// Nearest enclosing stack.
    pub fn of(node: &Rc<CloudNode>) -> Result<Rc<CloudNode>> {
        node.find_ancestor(|k| matches!(k, CloudKind::Stack(_)))
            .ok_or_else(|| BridgeError::NoEnclosingStack {
                path: node.path(),
                kind: "Stack",
            })
    }

    /// Region as a literal or an `AWS::Region` token.
    pub fn region(stack: &Rc<CloudNode>) -> String {
        match &*stack.kind() {
            CloudKind::Stack(StackProps { region: Some(r), .. }) => r.clone(),
            _ => Reference::pseudo("AWS::Region").token(),
        }
    }

    /// Account as a literal or an `AWS::AccountId` token.
    pub fn account(stack: &Rc<CloudNode>) -> String {
        match &*stack.kind() {
            CloudKind::Stack(StackProps { account: Some(a), .. }) => a.clone(),
            _ => Reference::pseudo("AWS::AccountId").token(),
        }
    }
}

#[derive(Clone)]
pub struct Parameter {
    node: Rc<CloudNode>,
}

impl Parameter {
    pub fn new(scope: &Rc<CloudNode>, id: &str, props: CfnParameter) -> Result<Self> {
        let node = scope.add_child(id, CloudKind::Parameter(props))?;
        Ok(Self { node })
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.node
    }

    /// `{"Ref": <param>}` typed after the parameter type.
    pub fn value(&self) -> Rc<Reference> {
        let hint = match &*self.node.kind() {
            CloudKind::Parameter(p) => p.type_hint(),
            _ => TypeHint::String,
        };
        Reference::for_element(&self.node, "Ref", Some(hint))
    }

    pub fn value_as_string(&self) -> String {
        self.value().token()
    }
}

#[derive(Clone)]
pub struct Resource {
    node: Rc<CloudNode>,
}

impl Resource {
    pub fn new(scope: &Rc<CloudNode>, id: &str, resource_type: &str, properties: Value) -> Result<Self> {
        let node = scope.add_child(
            id,
            CloudKind::Resource(CfnResource {
                resource_type: resource_type.to_string(),
                properties,
                retain: false,
            }),
        )?;
        Ok(Self { node })
    }

    pub fn from_node(node: Rc<CloudNode>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.node
    }

    /// Replace the properties of a declared resource.
    pub fn set_properties(&self, properties: Value) {
        if let CloudKind::Resource(r) = &mut *self.node.kind_mut() {
            r.properties = properties;
        }
    }

    pub fn set_retain(&self) {
        if let CloudKind::Resource(r) = &mut *self.node.kind_mut() {
            r.retain = true;
        }
    }

    /// `{"Ref": <resource>}` token.
    pub fn ref_token(&self) -> String {
        Reference::for_element(&self.node, "Ref", Some(TypeHint::String)).token()
    }

    /// `{"Fn::GetAtt": [<resource>, attr]}` token.
    pub fn get_att(&self, attribute: &str) -> String {
        Reference::for_element(&self.node, attribute, None).token()
    }

    pub fn logical_id(&self) -> Result<String> {
        logical_id(&self.node)
    }
}

#[derive(Clone)]
pub struct Output {
    node: Rc<CloudNode>,
}

impl Output {
    pub fn new(scope: &Rc<CloudNode>, id: &str, value: Value) -> Result<Self> {
        let node = scope.add_child(id, CloudKind::Output(CfnOutput { value, description: None }))?;
        Ok(Self { node })
    }

    pub fn set_description(&self, description: &str) {
        if let CloudKind::Output(o) = &mut *self.node.kind_mut() {
            o.description = Some(description.to_string());
        }
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.node
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Whether the node renders into the template.
pub fn is_element(node: &CloudNode) -> bool {
    matches!(
        *node.kind(),
        CloudKind::Parameter(_) | CloudKind::Resource(_) | CloudKind::Output(_)
    )
}

/// Template logical id: the id itself for top-level constructs, otherwise the
/// joined path components plus an 8-char BLAKE3 suffix of the full path.
pub fn logical_id(node: &Rc<CloudNode>) -> Result<String> {
    let stack = Stack::of(node)?;
    let components: Vec<String> = node
        .scopes()
        .into_iter()
        .skip_while(|n| !Rc::ptr_eq(n, &stack))
        .skip(1)
        .map(|n| n.id().to_string())
        .collect();

    if components.len() == 1 {
        return Ok(alphanumeric(&components[0]));
    }

    let mut human = String::new();
    let mut last = "";
    for c in &components {
        if c == "Resource" || c == "Default" || c == last {
            continue;
        }
        human.push_str(&alphanumeric(c));
        last = c;
    }
    let hash = blake3::hash(components.join("/").as_bytes()).to_hex();
    Ok(format!("{}{}", human, hash[..8].to_uppercase()))
}

fn alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Unresolved template fragment for an element, `None` for other constructs.
pub fn to_cloudformation(node: &Rc<CloudNode>) -> Result<Option<Value>> {
    let id = match &*node.kind() {
        CloudKind::Parameter(_) | CloudKind::Resource(_) | CloudKind::Output(_) => logical_id(node)?,
        _ => return Ok(None),
    };
    let fragment = match &*node.kind() {
        CloudKind::Parameter(p) => {
            let mut decl = Map::new();
            decl.insert("Type".into(), json!(p.param_type));
            if let Some(d) = &p.default {
                decl.insert("Default".into(), d.clone());
            }
            if let Some(d) = &p.description {
                decl.insert("Description".into(), json!(d));
            }
            if p.no_echo {
                decl.insert("NoEcho".into(), json!(true));
            }
            json!({ "Parameters": { id: decl } })
        }
        CloudKind::Resource(r) => {
            let mut decl = Map::new();
            decl.insert("Type".into(), json!(r.resource_type));
            let has_props = r.properties.as_object().is_some_and(|o| !o.is_empty());
            if has_props {
                decl.insert("Properties".into(), r.properties.clone());
            }
            if r.retain {
                decl.insert("UpdateReplacePolicy".into(), json!("Retain"));
                decl.insert("DeletionPolicy".into(), json!("Retain"));
            }
            json!({ "Resources": { id: decl } })
        }
        CloudKind::Output(o) => {
            let mut decl = Map::new();
            decl.insert("Value".into(), o.value.clone());
            if let Some(d) = &o.description {
                decl.insert("Description".into(), json!(d));
            }
            json!({ "Outputs": { id: decl } })
        }
        _ => return Ok(None),
    };
    Ok(Some(fragment))
}
