//! TB-012: Cloud app — custom synthesis hooks, template rendering, assembly output.
//!
//! `synth` runs every attached hook first, then renders and validates each
//! stack in memory. Files are only written once everything succeeded, so a
//! failing hook leaves no partial assembly behind.

use super::asset;
use super::elements::{is_element, to_cloudformation, CloudKind, CloudNode};
use super::resolve::{resolve, DefaultTokenResolver, ResolveContext};
use crate::core::artifact;
use crate::core::error::{BridgeError, Result};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

/// Runs once during synthesis, before templates are rendered.
pub type SynthHook = Box<dyn FnOnce() -> Result<()>>;

/// Inspects a rendered template; `Some(message)` fails the synthesis.
pub type TemplateCheck = Box<dyn Fn(&Value) -> Option<String>>;

/// Root payload: output directory plus registered hooks and checks.
pub struct AppState {
    pub outdir: PathBuf,
    hooks: Vec<(String, SynthHook)>,
    checks: Vec<(String, TemplateCheck)>,
}

/// The root of a cloud-resource graph.
#[derive(Clone)]
pub struct CloudApp {
    root: Rc<CloudNode>,
}

/// What `synth` produced.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub outdir: PathBuf,
    /// Stack name to resolved template.
    pub templates: IndexMap<String, Value>,
}

impl CloudAssembly {
    pub fn template(&self, stack: &str) -> Option<&Value> {
        self.templates.get(stack)
    }
}

impl CloudApp {
    pub fn new(outdir: &Path) -> Self {
        let state = AppState {
            outdir: outdir.to_path_buf(),
            hooks: Vec::new(),
            checks: Vec::new(),
        };
        Self {
            root: CloudNode::root("", CloudKind::App(state)),
        }
    }

    /// The app owning `node`.
    pub fn of(node: &Rc<CloudNode>) -> Self {
        let root = node.scopes().into_iter().next().unwrap_or_else(|| Rc::clone(node));
        Self { root }
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.root
    }

    pub fn outdir(&self) -> PathBuf {
        match &*self.root.kind() {
            CloudKind::App(state) => state.outdir.clone(),
            _ => PathBuf::from("cdk.out"),
        }
    }

    /// Stacks directly under the app.
    pub fn stacks(&self) -> Vec<Rc<CloudNode>> {
        self.root
            .children()
            .into_iter()
            .filter(|c| matches!(*c.kind(), CloudKind::Stack(_)))
            .collect()
    }

    /// Render, validate and write every stack.
    pub fn synth(&self) -> Result<CloudAssembly> {
        let outdir = self.outdir();
        info!(outdir = %outdir.display(), "synthesizing cloud assembly");

        let hooks = match &mut *self.root.kind_mut() {
            CloudKind::App(state) => std::mem::take(&mut state.hooks),
            _ => Vec::new(),
        };
        for (path, hook) in hooks {
            debug!(construct = %path, "running custom synthesis");
            hook()?;
        }

        let mut templates = IndexMap::new();
        for stack in self.stacks() {
            let template = stack_template(&stack)?;
            self.run_checks(stack.id(), &template)?;
            templates.insert(stack.id().to_string(), template);
        }

        let assets = asset::stage_all(&self.root, &outdir)?;
        let mut artifacts = Map::new();
        for (name, template) in &templates {
            let file = format!("{}.template.json", name);
            artifact::write_json_atomic(&outdir.join(&file), template)?;
            artifacts.insert(
                name.clone(),
                json!({
                    "type": "aws:cloudformation:stack",
                    "properties": { "templateFile": file },
                }),
            );
        }
        let manifest = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "artifacts": artifacts,
            "assets": assets,
        });
        artifact::write_json_atomic(&outdir.join("manifest.json"), &manifest)?;

        Ok(CloudAssembly { outdir, templates })
    }

    fn run_checks(&self, stack: &str, template: &Value) -> Result<()> {
        if let CloudKind::App(state) = &*self.root.kind() {
            for (path, check) in &state.checks {
                if let Some(message) = check(template) {
                    return Err(BridgeError::Validation {
                        stack: stack.to_string(),
                        message: format!("{} ({})", message, path),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Register a hook that runs once when the owning app synthesizes.
pub fn attach_custom_synthesis(node: &Rc<CloudNode>, hook: SynthHook) {
    let app = CloudApp::of(node);
    if let CloudKind::App(state) = &mut *app.root.kind_mut() {
        state.hooks.push((node.path(), hook));
    };
}

/// Register a check run against every rendered template.
pub fn add_validation(node: &Rc<CloudNode>, check: TemplateCheck) {
    let app = CloudApp::of(node);
    if let CloudKind::App(state) = &mut *app.root.kind_mut() {
        state.checks.push((node.path(), check));
    };
}

/// Every template element of the stack, in tree order.
pub fn stack_elements(stack: &Rc<CloudNode>) -> Vec<Rc<CloudNode>> {
    stack.find_all().into_iter().filter(|n| is_element(n)).collect()
}

/// Merge and resolve the fragments of every element in `stack`.
pub fn stack_template(stack: &Rc<CloudNode>) -> Result<Value> {
    let mut sections: IndexMap<&'static str, Map<String, Value>> = IndexMap::new();
    for key in ["Parameters", "Resources", "Outputs"] {
        sections.insert(key, Map::new());
    }

    for element in stack_elements(stack) {
        let Some(fragment) = to_cloudformation(&element)? else {
            continue;
        };
        let ctx = ResolveContext {
            scope: Rc::clone(&element),
            preparing: false,
        };
        let resolved = resolve(&fragment, &ctx, &mut DefaultTokenResolver)?;
        if let Value::Object(top) = resolved {
            for (section, entries) in top {
                if let (Some(target), Value::Object(entries)) = (sections.get_mut(section.as_str()), entries) {
                    target.extend(entries);
                }
            }
        }
    }

    let mut template = Map::new();
    if let CloudKind::Stack(props) = &*stack.kind() {
        if let Some(d) = &props.description {
            template.insert("Description".into(), json!(d));
        }
    }
    for (key, entries) in sections {
        if !entries.is_empty() {
            template.insert(key.to_string(), Value::Object(entries));
        }
    }
    Ok(Value::Object(template))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::elements::{CfnParameter, Output, Parameter, Resource, Stack, StackProps};
    use std::cell::Cell;

    #[test]
    fn test_tb012_synth_writes_template_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let app = CloudApp::new(dir.path());
        let stack = Stack::new(&app, "aws-stack", StackProps::default()).unwrap();
        let p = Parameter::new(&stack, "TestParam", CfnParameter::new("String")).unwrap();
        Output::new(&stack, "TestOutput", json!(p.value_as_string())).unwrap();

        let asm = app.synth().unwrap();
        let t = asm.template("aws-stack").unwrap();
        assert_eq!(t["Outputs"]["TestOutput"]["Value"], json!({ "Ref": "TestParam" }));
        assert!(dir.path().join("aws-stack.template.json").exists());
        let manifest = artifact::read_json(&dir.path().join("manifest.json")).unwrap();
        assert_eq!(
            manifest["artifacts"]["aws-stack"]["properties"]["templateFile"],
            "aws-stack.template.json"
        );
    }

    #[test]
    fn test_tb012_hooks_run_once_before_render() {
        let dir = tempfile::tempdir().unwrap();
        let app = CloudApp::new(dir.path());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let scope = Rc::clone(&stack);
        attach_custom_synthesis(
            &stack,
            Box::new(move || {
                seen.set(seen.get() + 1);
                Resource::new(&scope, "Late", "AWS::SNS::Topic", json!({}))?;
                Ok(())
            }),
        );
        let asm = app.synth().unwrap();
        assert_eq!(calls.get(), 1);
        assert!(asm.template("s").unwrap()["Resources"].get("Late").is_some());
        app.synth().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_tb012_failing_hook_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cdk.out");
        let app = CloudApp::new(&out);
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        attach_custom_synthesis(&stack, Box::new(|| Err(BridgeError::NoStack)));
        let err = app.synth().err().unwrap();
        assert!(matches!(err, BridgeError::NoStack));
        assert!(!out.exists());
    }

    #[test]
    fn test_tb012_validation_rejects_template() {
        let dir = tempfile::tempdir().unwrap();
        let app = CloudApp::new(dir.path());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        Output::new(&stack, "Bad", json!("forbidden")).unwrap();
        add_validation(
            &stack,
            Box::new(|t: &Value| t.to_string().contains("forbidden").then(|| "found it".to_string())),
        );
        let err = app.synth().err().unwrap();
        assert!(err.to_string().contains("found it"));
    }
}
