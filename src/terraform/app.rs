//! TB-022: Provisioning app — prepare pass and synthesis to `stacks/<id>/`.
//!
//! Resolving an element may add new elements (an input declared on first
//! use), so `synth` first resolves every element with `preparing = true`
//! until the tree stops growing. Only then is the document rendered, once.

use super::elements::{deep_merge, is_element, set_path, stack_overrides, to_terraform, TfKind, TfNode};
use super::resolve::{resolve, DefaultTfResolver, TfResolveContext, MAX_DEPTH};
use crate::core::artifact;
use crate::core::error::{BridgeError, Result};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

/// Name of the synthesized document inside each stack directory.
pub const STACK_DOCUMENT: &str = "cdk.tf.json";

#[derive(Clone)]
pub struct TfApp {
    root: Rc<TfNode>,
}

/// What `synth` produced.
#[derive(Debug, Clone)]
pub struct TfAssembly {
    pub outdir: PathBuf,
    pub documents: IndexMap<String, Value>,
}

impl TfAssembly {
    pub fn stack_dir(&self, id: &str) -> PathBuf {
        self.outdir.join("stacks").join(id)
    }

    pub fn document_path(&self, id: &str) -> PathBuf {
        self.stack_dir(id).join(STACK_DOCUMENT)
    }
}

impl TfApp {
    pub fn new(outdir: &Path) -> Self {
        Self {
            root: TfNode::root("", TfKind::App(outdir.to_path_buf())),
        }
    }

    pub fn node(&self) -> &Rc<TfNode> {
        &self.root
    }

    pub fn outdir(&self) -> PathBuf {
        match &*self.root.kind() {
            TfKind::App(dir) => dir.clone(),
            _ => PathBuf::from("cdktf.out"),
        }
    }

    pub fn stacks(&self) -> Vec<Rc<TfNode>> {
        self.root
            .children()
            .into_iter()
            .filter(|c| matches!(*c.kind(), TfKind::Stack(_)))
            .collect()
    }

    /// Prepare, render and write every stack plus `manifest.json`.
    pub fn synth(&self) -> Result<TfAssembly> {
        let outdir = self.outdir();
        info!(outdir = %outdir.display(), "synthesizing provisioning app");

        let mut documents = IndexMap::new();
        let mut manifest_stacks = Map::new();
        for stack in self.stacks() {
            prepare(&stack)?;
            let document = render(&stack)?;
            let id = stack.id().to_string();
            let dir = outdir.join("stacks").join(&id);
            let assets = dir.join("assets");
            std::fs::create_dir_all(&assets).map_err(|e| BridgeError::io("create", &assets, e))?;
            copy_assets(&stack, &dir)?;
            artifact::write_json_atomic(&dir.join(STACK_DOCUMENT), &document)?;
            manifest_stacks.insert(
                id.clone(),
                json!({
                    "name": id,
                    "synthesizedStackPath": format!("stacks/{}/{}", id, STACK_DOCUMENT),
                    "workingDirectory": format!("stacks/{}", id),
                }),
            );
            documents.insert(id, document);
        }

        let manifest = json!({
            "version": env!("CARGO_PKG_VERSION"),
            "stacks": manifest_stacks,
        });
        artifact::write_json_atomic(&outdir.join("manifest.json"), &manifest)?;
        Ok(TfAssembly { outdir, documents })
    }
}

fn elements(stack: &Rc<TfNode>) -> Vec<Rc<TfNode>> {
    stack.find_all().into_iter().filter(|n| is_element(n)).collect()
}

/// Resolve every element and override with `preparing = true` until no
/// element is added.
pub fn prepare(stack: &Rc<TfNode>) -> Result<()> {
    let mut seen = 0;
    for round in 0..MAX_DEPTH {
        let current = elements(stack);
        if current.len() == seen {
            debug!(stack = %stack.id(), rounds = round, "prepare pass settled");
            return Ok(());
        }
        seen = current.len();
        for element in current {
            if let Some(fragment) = to_terraform(&element)? {
                let ctx = TfResolveContext {
                    scope: Rc::clone(&element),
                    preparing: true,
                };
                resolve(&fragment, &ctx, &mut DefaultTfResolver)?;
            }
        }
        let ctx = TfResolveContext {
            scope: Rc::clone(stack),
            preparing: true,
        };
        for (_, value) in stack_overrides(stack) {
            resolve(&value, &ctx, &mut DefaultTfResolver)?;
        }
    }
    Err(BridgeError::ResolutionDepth(MAX_DEPTH))
}

/// Merge the resolved fragments of every element and apply overrides.
pub fn render(stack: &Rc<TfNode>) -> Result<Value> {
    let mut document = json!({
        "//": {
            "metadata": {
                "version": env!("CARGO_PKG_VERSION"),
                "stackName": stack.id(),
                "backend": "local",
            }
        }
    });
    for element in elements(stack) {
        let Some(fragment) = to_terraform(&element)? else {
            continue;
        };
        let ctx = TfResolveContext {
            scope: Rc::clone(&element),
            preparing: false,
        };
        deep_merge(&mut document, resolve(&fragment, &ctx, &mut DefaultTfResolver)?);
    }

    let ctx = TfResolveContext {
        scope: Rc::clone(stack),
        preparing: false,
    };
    for (path, value) in stack_overrides(stack) {
        set_path(&mut document, &path, resolve(&value, &ctx, &mut DefaultTfResolver)?);
    }
    if let Some(name) = document["terraform"]["backend"].as_object().and_then(|b| b.keys().next().cloned()) {
        document["//"]["metadata"]["backend"] = json!(name);
    }
    Ok(document)
}

fn copy_assets(stack: &Rc<TfNode>, stack_dir: &Path) -> Result<()> {
    for node in stack.find_all() {
        let source = match &*node.kind() {
            TfKind::Asset(s) => s.clone(),
            _ => continue,
        };
        let target = stack_dir.join(source.relative_path(node.id()));
        if target.exists() {
            continue;
        }
        if source.source.is_dir() {
            copy_dir(&source.source, &target)?;
        } else {
            std::fs::create_dir_all(&target).map_err(|e| BridgeError::io("create", &target, e))?;
            let name = source.source.file_name().unwrap_or_default();
            std::fs::copy(&source.source, target.join(name))
                .map_err(|e| BridgeError::io("copy", &source.source, e))?;
        }
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).map_err(|e| BridgeError::io("create", to, e))?;
    let read_dir = std::fs::read_dir(from).map_err(|e| BridgeError::io("read dir", from, e))?;
    for entry in read_dir.filter_map(|e| e.ok()) {
        let path = entry.path();
        let target = to.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &target)?;
        } else if path.is_file() {
            std::fs::copy(&path, &target).map_err(|e| BridgeError::io("copy", &path, e))?;
        }
    }
    Ok(())
}
