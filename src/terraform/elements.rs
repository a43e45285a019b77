//! TB-021: Provisioning-graph constructs — stack, provider, resource,
//! variable, output, backend and asset.

use super::app::TfApp;
use super::resolve::{attribute_token, TfExpression};
use crate::core::error::{BridgeError, Result};
use crate::core::construct::Node;
use crate::tripwire::hasher;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub type TfNode = Node<TfKind>;

/// Payload of a provisioning-graph construct.
pub enum TfKind {
    App(PathBuf),
    Stack(TfStackState),
    Provider { name: String, config: Value },
    Resource { resource_type: String, config: Value },
    Variable(VariableConfig),
    Output(OutputConfig),
    Backend { backend: String, config: Value },
    Asset(TfAssetSource),
    Construct,
}

/// Raw overrides applied to the rendered document, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct TfStackState {
    pub overrides: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableConfig {
    /// Terraform type expression, e.g. `string` or `list(string)`.
    pub var_type: Option<String>,
    pub nullable: Option<bool>,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub sensitive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub value: Value,
    pub description: Option<String>,
    pub sensitive: bool,
}

/// File or directory shipped alongside the synthesized document.
#[derive(Debug, Clone)]
pub struct TfAssetSource {
    pub source: PathBuf,
    pub hash: String,
}

impl TfAssetSource {
    /// Path of the copy relative to the stack directory.
    pub fn relative_path(&self, id: &str) -> String {
        format!("assets/{}/{}", id, self.hash)
    }
}

// ============================================================================
// Handles
// ============================================================================

pub struct TerraformStack;

impl TerraformStack {
    pub fn new(app: &TfApp, id: &str) -> Result<Rc<TfNode>> {
        app.node().add_child(id, TfKind::Stack(TfStackState::default()))
    }
}

/// Nearest enclosing provisioning stack.
pub fn stack_of(node: &Rc<TfNode>) -> Result<Rc<TfNode>> {
    node.find_ancestor(|k| matches!(k, TfKind::Stack(_)))
        .ok_or_else(|| BridgeError::NoEnclosingStack {
            path: node.path(),
            kind: "TerraformStack",
        })
}

/// Set `value` at the dotted `path` of the stack's rendered document.
pub fn add_override(stack: &Rc<TfNode>, path: &str, value: Value) {
    if let TfKind::Stack(state) = &mut *stack.kind_mut() {
        state.overrides.push((path.to_string(), value));
    }
}

/// The stack's overrides, in insertion order.
pub fn stack_overrides(stack: &Rc<TfNode>) -> Vec<(String, Value)> {
    match &*stack.kind() {
        TfKind::Stack(state) => state.overrides.clone(),
        _ => Vec::new(),
    }
}

pub struct TerraformProvider;

impl TerraformProvider {
    pub fn new(scope: &Rc<TfNode>, name: &str, config: Value) -> Result<Rc<TfNode>> {
        scope.add_child(
            name,
            TfKind::Provider {
                name: name.to_string(),
                config,
            },
        )
    }
}

#[derive(Clone)]
pub struct TerraformResource {
    node: Rc<TfNode>,
    resource_type: String,
}

impl TerraformResource {
    pub fn new(scope: &Rc<TfNode>, id: &str, resource_type: &str, config: Value) -> Result<Self> {
        let node = scope.add_child(
            id,
            TfKind::Resource {
                resource_type: resource_type.to_string(),
                config,
            },
        )?;
        Ok(Self {
            node,
            resource_type: resource_type.to_string(),
        })
    }

    pub fn node(&self) -> &Rc<TfNode> {
        &self.node
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn set_config(&self, config: Value) {
        if let TfKind::Resource { config: c, .. } = &mut *self.node.kind_mut() {
            *c = config;
        }
    }

    /// Token for `${<type>.<id>.<attribute>}`.
    pub fn get_string_attribute(&self, attribute: &str) -> String {
        attribute_token(&self.node, &self.resource_type, attribute)
    }
}

#[derive(Clone)]
pub struct TerraformVariable {
    node: Rc<TfNode>,
}

impl TerraformVariable {
    pub fn new(scope: &Rc<TfNode>, id: &str, config: VariableConfig) -> Result<Self> {
        let node = scope.add_child(id, TfKind::Variable(config))?;
        Ok(Self { node })
    }

    pub fn node(&self) -> &Rc<TfNode> {
        &self.node
    }

    /// Token for `${var.<name>}`.
    pub fn value(&self) -> Result<String> {
        Ok(TfExpression::token(&format!("var.{}", logical_id(&self.node)?)))
    }
}

pub struct TerraformOutput;

impl TerraformOutput {
    pub fn new(scope: &Rc<TfNode>, id: &str, config: OutputConfig) -> Result<Rc<TfNode>> {
        scope.add_child(id, TfKind::Output(config))
    }
}

pub struct TerraformBackend;

impl TerraformBackend {
    pub fn new(scope: &Rc<TfNode>, id: &str, backend: &str, config: Value) -> Result<Rc<TfNode>> {
        scope.add_child(
            id,
            TfKind::Backend {
                backend: backend.to_string(),
                config,
            },
        )
    }
}

#[derive(Clone)]
pub struct TerraformAsset {
    node: Rc<TfNode>,
    source: TfAssetSource,
}

impl TerraformAsset {
    pub fn new(scope: &Rc<TfNode>, id: &str, path: &Path) -> Result<Self> {
        let digest = if path.is_dir() {
            hasher::hash_directory(path)?
        } else {
            hasher::hash_file(path)?
        };
        let source = TfAssetSource {
            source: path.to_path_buf(),
            hash: hasher::hex(&digest).to_string(),
        };
        let node = scope.add_child(id, TfKind::Asset(source.clone()))?;
        Ok(Self { node, source })
    }

    /// Location of the copy, relative to the stack directory.
    pub fn path(&self) -> String {
        self.source.relative_path(self.node.id())
    }
}

// ============================================================================
// Rendering
// ============================================================================

pub fn is_element(node: &TfNode) -> bool {
    matches!(
        *node.kind(),
        TfKind::Provider { .. }
            | TfKind::Resource { .. }
            | TfKind::Variable(_)
            | TfKind::Output(_)
            | TfKind::Backend { .. }
    )
}

/// Path components below the stack joined with `_`.
pub fn logical_id(node: &Rc<TfNode>) -> Result<String> {
    let stack = stack_of(node)?;
    let components: Vec<String> = node
        .scopes()
        .into_iter()
        .skip_while(|n| !Rc::ptr_eq(n, &stack))
        .skip(1)
        .map(|n| sanitize(n.id()))
        .collect();
    Ok(components.join("_"))
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Unresolved document fragment of an element, `None` for other constructs.
pub fn to_terraform(node: &Rc<TfNode>) -> Result<Option<Value>> {
    if !is_element(node) {
        return Ok(None);
    }
    let id = logical_id(node)?;
    let fragment = match &*node.kind() {
        TfKind::Provider { name, config } => json!({ "provider": { name: [config] } }),
        TfKind::Resource { resource_type, config } => {
            json!({ "resource": { resource_type: { id: config } } })
        }
        TfKind::Variable(v) => {
            let mut decl = Map::new();
            if let Some(t) = &v.var_type {
                decl.insert("type".into(), json!(t));
            }
            if let Some(n) = v.nullable {
                decl.insert("nullable".into(), json!(n));
            }
            if let Some(d) = &v.default {
                decl.insert("default".into(), d.clone());
            }
            if let Some(d) = &v.description {
                decl.insert("description".into(), json!(d));
            }
            if v.sensitive {
                decl.insert("sensitive".into(), json!(true));
            }
            json!({ "variable": { id: decl } })
        }
        TfKind::Output(o) => {
            let mut decl = Map::new();
            decl.insert("value".into(), o.value.clone());
            if let Some(d) = &o.description {
                decl.insert("description".into(), json!(d));
            }
            if o.sensitive {
                decl.insert("sensitive".into(), json!(true));
            }
            json!({ "output": { id: decl } })
        }
        TfKind::Backend { backend, config } => json!({ "terraform": { "backend": { backend: config } } }),
        _ => return Ok(None),
    };
    Ok(Some(fragment))
}

/// Recursive object merge; non-object values in `src` replace.
pub fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(existing) if existing.is_object() && v.is_object() => deep_merge(existing, v),
                    _ => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (d, s) => *d = s,
    }
}

/// Replace the value at a dotted path, creating objects along the way.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if keys.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        current = map.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> (TfApp, Rc<TfNode>) {
        let app = TfApp::new(&std::env::temp_dir());
        let stack = TerraformStack::new(&app, "tf").unwrap();
        (app, stack)
    }

    #[test]
    fn test_tb021_logical_ids() {
        let (_app, stack) = stack();
        let group = stack.add_child("net", TfKind::Construct).unwrap();
        let r = TerraformResource::new(&group, "main.vpc", "aws_vpc", json!({})).unwrap();
        assert_eq!(logical_id(r.node()).unwrap(), "net_main_vpc");
    }

    #[test]
    fn test_tb021_stack_of_outside_stack() {
        let app = TfApp::new(&std::env::temp_dir());
        let loose = app.node().add_child("loose", TfKind::Construct).unwrap();
        assert!(matches!(stack_of(&loose), Err(BridgeError::NoEnclosingStack { .. })));
    }

    #[test]
    fn test_tb021_variable_fragment() {
        let (_app, stack) = stack();
        let v = TerraformVariable::new(
            &stack,
            "cdk-Ref-1",
            VariableConfig {
                var_type: Some("string".into()),
                nullable: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        let frag = to_terraform(v.node()).unwrap().unwrap();
        assert_eq!(frag, json!({ "variable": { "cdk-Ref-1": { "type": "string", "nullable": false } } }));
        assert!(v.value().unwrap().starts_with("${TfToken["));
    }

    #[test]
    fn test_tb021_provider_and_backend_fragments() {
        let (_app, stack) = stack();
        let p = TerraformProvider::new(&stack, "aws", json!({ "region": "us-east-1" })).unwrap();
        let b = TerraformBackend::new(&stack, "backend", "local", json!({ "path": "x" })).unwrap();
        assert_eq!(
            to_terraform(&p).unwrap().unwrap(),
            json!({ "provider": { "aws": [{ "region": "us-east-1" }] } })
        );
        assert_eq!(
            to_terraform(&b).unwrap().unwrap()["terraform"]["backend"]["local"]["path"],
            "x"
        );
        assert!(to_terraform(&stack).unwrap().is_none());
    }

    #[test]
    fn test_tb021_deep_merge_and_set_path() {
        let mut doc = json!({ "resource": { "a": { "x": {} } }, "terraform": { "backend": { "local": {} } } });
        deep_merge(&mut doc, json!({ "resource": { "a": { "y": {} } } }));
        assert!(doc["resource"]["a"].get("x").is_some());
        assert!(doc["resource"]["a"].get("y").is_some());
        set_path(&mut doc, "terraform.backend", json!({ "s3": {} }));
        assert_eq!(doc["terraform"]["backend"], json!({ "s3": {} }));
        set_path(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc["a"]["b"]["c"], 1);
    }

    #[test]
    fn test_tb021_asset_path() {
        let (_app, stack) = stack();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("index.js"), "x").unwrap();
        let a = TerraformAsset::new(&stack, "lambda", src.path()).unwrap();
        assert!(a.path().starts_with("assets/lambda/"));
        assert_eq!(a.path().len(), "assets/lambda/".len() + 64);
    }
}
