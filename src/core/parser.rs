//! TB-008: bridge.yaml parsing and validation.
//!
//! Parses bridge.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Every `{{...}}` template must point at a declared construct
//! - Construct ids must be unique within the cloud stack

use super::error::{BridgeError, Result};
use super::template::{template_refs, TemplateRef};
use super::types::*;
use std::collections::HashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a bridge.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<BridgeConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BridgeError::io("read", path, e))?;
    parse_config(&content)
}

/// Parse a bridge.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<BridgeConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &BridgeConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.is_empty() {
        push("name must not be empty".to_string());
    }
    if config.stack.name.is_empty() {
        push("stack.name must not be empty".to_string());
    }
    if config.terraform.stack.is_empty() {
        push("terraform.stack must not be empty".to_string());
    }

    // Parameters, resources, outputs and the adapter share the stack's namespace.
    let mut ids = HashSet::new();
    let cloud_ids = config
        .parameters
        .keys()
        .chain(config.resources.keys())
        .chain(config.outputs.keys())
        .chain(std::iter::once(&config.terraform.id));
    for id in cloud_ids {
        if !ids.insert(id.as_str()) {
            push(format!("duplicate construct id '{}' in stack '{}'", id, config.stack.name));
        }
    }

    for (id, r) in &config.resources {
        if !r.resource_type.contains("::") {
            push(format!("resource '{}' has invalid type '{}'", id, r.resource_type));
        }
        check_templates(config, &format!("resource '{}'", id), &r.properties, &mut push);
    }
    for (id, o) in &config.outputs {
        check_template(config, &format!("output '{}'", id), &o.value, &mut push);
    }

    let tf = &config.terraform;
    for (name, p) in &tf.providers {
        check_templates(config, &format!("provider '{}'", name), p, &mut push);
    }
    if let Some(b) = &tf.backend {
        if b.backend_type.is_empty() {
            push("terraform.backend.type must not be empty".to_string());
        }
    }
    for (id, r) in &tf.resources {
        if r.resource_type.is_empty() {
            push(format!("tf resource '{}' has no type", id));
        }
        check_templates(config, &format!("tf resource '{}'", id), &r.config, &mut push);
    }
    for (id, o) in &tf.outputs {
        check_template(config, &format!("tf output '{}'", id), &o.value, &mut push);
    }

    errors
}

fn check_templates(config: &BridgeConfig, owner: &str, value: &serde_yaml_ng::Value, push: &mut impl FnMut(String)) {
    use serde_yaml_ng::Value as Y;
    match value {
        Y::String(s) => check_template(config, owner, s, push),
        Y::Sequence(items) => {
            for v in items {
                check_templates(config, owner, v, &mut *push);
            }
        }
        Y::Mapping(map) => {
            for v in map.values() {
                check_templates(config, owner, v, &mut *push);
            }
        }
        Y::Tagged(t) => check_templates(config, owner, &t.value, push),
        _ => {}
    }
}

fn check_template(config: &BridgeConfig, owner: &str, template: &str, push: &mut impl FnMut(String)) {
    let refs = match template_refs(template) {
        Ok(refs) => refs,
        Err(e) => return push(format!("{}: {}", owner, e)),
    };
    for r in refs {
        match r {
            TemplateRef::Param(name) if !config.parameters.contains_key(&name) => {
                push(format!("{} references unknown param '{}'", owner, name));
            }
            TemplateRef::Cloud { id, .. } if !config.resources.contains_key(&id) => {
                push(format!("{} references unknown cloud resource '{}'", owner, id));
            }
            TemplateRef::Tf {
                resource_type, name, ..
            } => match config.terraform.resources.get(&name) {
                None => push(format!("{} references unknown tf resource '{}'", owner, name)),
                Some(r) if r.resource_type != resource_type => push(format!(
                    "{} references tf resource '{}' as {}, declared as {}",
                    owner, name, resource_type, r.resource_type
                )),
                Some(_) => {}
            },
            _ => {}
        }
    }
}
