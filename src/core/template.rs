//! TB-006: Template resolution for bridge.yaml values.
//!
//! Resolves `{{param.NAME}}`, `{{cloud.ID.ATTR}}` and `{{tf.TYPE.NAME.ATTR}}`
//! into token strings of the graph the value lives in. A reference into the
//! other graph is converted with `ascend` / `descend`.

use super::error::{BridgeError, Result};
use crate::bridge::convert::{ascend, descend};
use crate::cloud::{Parameter, Resource};
use crate::terraform::TerraformResource;
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// One parsed `{{...}}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Param(String),
    Cloud { id: String, attribute: String },
    Tf { resource_type: String, name: String, attribute: String },
}

/// Which graph a templated value ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Cloud,
    Terraform,
}

/// Constructs a template may point at.
#[derive(Default)]
pub struct TemplateScope {
    pub parameters: IndexMap<String, Parameter>,
    pub cloud_resources: IndexMap<String, Resource>,
    /// Keyed by resource name; the type is checked on lookup.
    pub tf_resources: IndexMap<String, (String, TerraformResource)>,
}

/// Parse the inside of a `{{...}}` marker.
pub fn parse_ref(key: &str) -> std::result::Result<TemplateRef, String> {
    if let Some(name) = key.strip_prefix("param.") {
        if name.is_empty() || name.contains('.') {
            return Err(format!("invalid param ref: {}", key));
        }
        return Ok(TemplateRef::Param(name.to_string()));
    }
    if let Some(rest) = key.strip_prefix("cloud.") {
        let parts: Vec<&str> = rest.splitn(2, '.').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(format!("invalid cloud ref: {}", key));
        }
        return Ok(TemplateRef::Cloud {
            id: parts[0].to_string(),
            attribute: parts[1].to_string(),
        });
    }
    if let Some(rest) = key.strip_prefix("tf.") {
        let parts: Vec<&str> = rest.splitn(3, '.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(format!("invalid tf ref: {}", key));
        }
        return Ok(TemplateRef::Tf {
            resource_type: parts[0].to_string(),
            name: parts[1].to_string(),
            attribute: parts[2].to_string(),
        });
    }
    Err(format!("unknown template variable: {}", key))
}

/// Every `{{...}}` reference in `template`, in order.
pub fn template_refs(template: &str) -> std::result::Result<Vec<TemplateRef>, String> {
    let mut refs = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let close = rest[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template in '{}'", template))?;
        refs.push(parse_ref(rest[open + 2..open + close].trim())?);
        rest = &rest[open + close + 2..];
    }
    Ok(refs)
}

impl TemplateScope {
    fn lookup(&self, reference: &TemplateRef, side: Side) -> Result<String> {
        match reference {
            TemplateRef::Param(name) => {
                let p = self
                    .parameters
                    .get(name)
                    .ok_or_else(|| BridgeError::Config(format!("unknown param: {}", name)))?;
                cross(p.value_as_string(), side, Side::Cloud)
            }
            TemplateRef::Cloud { id, attribute } => {
                let r = self
                    .cloud_resources
                    .get(id)
                    .ok_or_else(|| BridgeError::Config(format!("unknown cloud resource: {}", id)))?;
                let token = if attribute == "Ref" { r.ref_token() } else { r.get_att(attribute) };
                cross(token, side, Side::Cloud)
            }
            TemplateRef::Tf {
                resource_type,
                name,
                attribute,
            } => {
                let (declared, r) = self
                    .tf_resources
                    .get(name)
                    .ok_or_else(|| BridgeError::Config(format!("unknown tf resource: {}", name)))?;
                if declared != resource_type {
                    return Err(BridgeError::Config(format!(
                        "tf resource '{}' is {}, not {}",
                        name, declared, resource_type
                    )));
                }
                cross(r.get_string_attribute(attribute), side, Side::Terraform)
            }
        }
    }
}

fn cross(token: String, target: Side, origin: Side) -> Result<String> {
    match (origin, target) {
        (Side::Cloud, Side::Terraform) => ascend(&token),
        (Side::Terraform, Side::Cloud) => descend(&token),
        _ => Ok(token),
    }
}

/// Replace every `{{...}}` in `template` with the token of its target.
pub fn resolve_template(template: &str, side: Side, scope: &TemplateScope) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| BridgeError::Config(format!("unclosed template at position {}", open)))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim().to_string();
        let reference = parse_ref(&key).map_err(BridgeError::Config)?;
        let value = scope.lookup(&reference, side)?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every string of a JSON value (keys are left alone).
pub fn resolve_value(value: &Value, side: Side, scope: &TemplateScope) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(resolve_template(s, side, scope)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, side, scope))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, side, scope)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CfnParameter, CloudApp, Stack, StackProps};
    use crate::terraform::{TerraformStack, TfApp};
    use serde_json::json;

    fn scope() -> TemplateScope {
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "aws", StackProps::default()).unwrap();
        let tf_app = TfApp::new(&std::env::temp_dir());
        let tf = TerraformStack::new(&tf_app, "tf").unwrap();

        let mut scope = TemplateScope::default();
        scope
            .parameters
            .insert("Env".into(), Parameter::new(&stack, "Env", CfnParameter::new("String")).unwrap());
        scope.cloud_resources.insert(
            "Topic".into(),
            Resource::new(&stack, "Topic", "AWS::SNS::Topic", json!({})).unwrap(),
        );
        scope.tf_resources.insert(
            "lb".into(),
            ("aws_lb".into(), TerraformResource::new(&tf, "lb", "aws_lb", json!({})).unwrap()),
        );
        scope
    }

    #[test]
    fn test_tb006_parse_refs() {
        assert_eq!(parse_ref("param.Env").unwrap(), TemplateRef::Param("Env".into()));
        assert_eq!(
            parse_ref("cloud.Topic.TopicName").unwrap(),
            TemplateRef::Cloud { id: "Topic".into(), attribute: "TopicName".into() }
        );
        assert_eq!(
            parse_ref("tf.aws_lb.lb.dns_name").unwrap(),
            TemplateRef::Tf { resource_type: "aws_lb".into(), name: "lb".into(), attribute: "dns_name".into() }
        );
        assert!(parse_ref("tf.aws_lb.lb").is_err());
        assert!(parse_ref("machine.x").is_err());
    }

    #[test]
    fn test_tb006_template_refs() {
        let refs = template_refs("a {{ param.Env }} b {{cloud.Topic.Ref}}").unwrap();
        assert_eq!(refs.len(), 2);
        assert!(template_refs("a {{param.Env").is_err());
        assert!(template_refs("no templates").unwrap().is_empty());
    }

    #[test]
    fn test_tb006_same_side_is_native_token() {
        let scope = scope();
        let s = resolve_template("{{param.Env}}", Side::Cloud, &scope).unwrap();
        assert_eq!(s, scope.parameters["Env"].value_as_string());
        let t = resolve_template("{{tf.aws_lb.lb.dns_name}}", Side::Terraform, &scope).unwrap();
        assert_eq!(t, scope.tf_resources["lb"].1.get_string_attribute("dns_name"));
    }

    #[test]
    fn test_tb006_other_side_is_converted() {
        let scope = scope();
        let up = resolve_template("name-{{param.Env}}", Side::Terraform, &scope).unwrap();
        assert!(up.starts_with("name-${TfToken["));
        let down = resolve_template("{{tf.aws_lb.lb.dns_name}}", Side::Cloud, &scope).unwrap();
        assert!(down.starts_with("${Token["));
    }

    #[test]
    fn test_tb006_unknown_targets() {
        let scope = scope();
        assert!(resolve_template("{{param.Nope}}", Side::Cloud, &scope).is_err());
        let err = resolve_template("{{tf.aws_alb.lb.arn}}", Side::Cloud, &scope).err().unwrap();
        assert!(err.to_string().contains("is aws_lb"));
    }

    #[test]
    fn test_tb006_resolve_value_walks_structure() {
        let scope = scope();
        let v = resolve_value(
            &json!({ "tags": ["{{param.Env}}", 3], "plain": "x" }),
            Side::Cloud,
            &scope,
        )
        .unwrap();
        assert_eq!(v["tags"][0], json!(scope.parameters["Env"].value_as_string()));
        assert_eq!(v["tags"][1], 3);
        assert_eq!(v["plain"], "x");
    }
}
