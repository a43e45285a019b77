//! TB-007: Build both construct graphs from a bridge.yaml.
//!
//! Constructs are declared first and configured second, so templates may
//! point at any construct regardless of declaration order.

use super::error::Result;
use super::template::{resolve_template, resolve_value, Side, TemplateScope};
use super::types::{yaml_to_json, BridgeConfig};
use crate::bridge::{reset_registries, TerraformStackAdapter};
use crate::cloud::{CfnParameter, CloudApp, CloudAssembly, CloudNode, Output, Parameter, Resource, Stack, StackProps};
use crate::terraform::{
    OutputConfig, TerraformBackend, TerraformOutput, TerraformProvider, TerraformResource, TerraformStack, TfNode,
};
use serde_json::{json, Value};
use std::path::Path;
use std::rc::Rc;
use tracing::info;

/// The graphs declared by one bridge.yaml.
pub struct BridgeGraph {
    pub app: CloudApp,
    pub stack: Rc<CloudNode>,
    pub adapter: TerraformStackAdapter,
    pub tf_stack: Rc<TfNode>,
}

/// Declare every construct of `config` under a cloud app writing to `outdir`.
pub fn build(config: &BridgeConfig, outdir: &Path) -> Result<BridgeGraph> {
    let app = CloudApp::new(outdir);
    let stack = Stack::new(
        &app,
        &config.stack.name,
        StackProps {
            region: config.stack.region.clone(),
            account: config.stack.account.clone(),
            description: config.description.clone(),
        },
    )?;

    let mut scope = TemplateScope::default();
    for (id, p) in &config.parameters {
        let props = CfnParameter {
            param_type: p.param_type.clone(),
            default: p.default.as_ref().map(yaml_to_json),
            description: p.description.clone(),
            no_echo: p.no_echo,
        };
        scope.parameters.insert(id.clone(), Parameter::new(&stack, id, props)?);
    }
    for (id, r) in &config.resources {
        let resource = Resource::new(&stack, id, &r.resource_type, json!({}))?;
        scope.cloud_resources.insert(id.clone(), resource);
    }

    let tf = &config.terraform;
    let adapter = TerraformStackAdapter::new(&stack, &tf.id)?;
    let tf_stack = TerraformStack::new(adapter.app(), &tf.stack)?;
    for (id, r) in &tf.resources {
        let resource = TerraformResource::new(&tf_stack, id, &r.resource_type, json!({}))?;
        scope.tf_resources.insert(id.clone(), (r.resource_type.clone(), resource));
    }

    // Second pass: everything referable exists, resolve templates.
    for (id, r) in &config.resources {
        let properties = resolve_value(&yaml_to_json(&r.properties), Side::Cloud, &scope)?;
        scope.cloud_resources[id].set_properties(non_null(properties));
    }
    for (name, p) in &tf.providers {
        let block = resolve_value(&yaml_to_json(p), Side::Terraform, &scope)?;
        TerraformProvider::new(&tf_stack, name, non_null(block))?;
    }
    if let Some(b) = &tf.backend {
        TerraformBackend::new(&tf_stack, "backend", &b.backend_type, non_null(yaml_to_json(&b.config)))?;
    }
    for (id, r) in &tf.resources {
        let block = resolve_value(&yaml_to_json(&r.config), Side::Terraform, &scope)?;
        scope.tf_resources[id].1.set_config(non_null(block));
    }
    for (id, o) in &tf.outputs {
        let value = resolve_template(&o.value, Side::Terraform, &scope)?;
        TerraformOutput::new(
            &tf_stack,
            id,
            OutputConfig {
                value: json!(value),
                description: o.description.clone(),
                sensitive: false,
            },
        )?;
    }
    for (id, o) in &config.outputs {
        let value = resolve_template(&o.value, Side::Cloud, &scope)?;
        let output = Output::new(&stack, id, json!(value))?;
        if let Some(d) = &o.description {
            output.set_description(d);
        }
    }

    info!(
        stack = %config.stack.name,
        parameters = config.parameters.len(),
        tf_resources = tf.resources.len(),
        "bridge graph declared"
    );
    Ok(BridgeGraph {
        app,
        stack,
        adapter,
        tf_stack,
    })
}

/// Build and synthesize in one step. The graph is dropped afterwards and the
/// thread's token registries are reset, so repeated runs number alike.
pub fn synth(config: &BridgeConfig, outdir: &Path) -> Result<CloudAssembly> {
    let assembly = build(config, outdir).and_then(|graph| graph.app.synth());
    reset_registries();
    assembly
}

fn non_null(v: Value) -> Value {
    if v.is_null() {
        json!({})
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;
    use crate::tripwire::eventlog;

    const CONFIG: &str = r#"
version: "1.0"
name: demo
stack:
  name: aws-stack
parameters:
  Env:
    type: String
    default: dev
resources:
  Topic:
    type: AWS::SNS::Topic
    properties:
      DisplayName: "topic-{{param.Env}}"
terraform:
  providers:
    aws:
      region: us-east-1
  backend:
    type: local
    config:
      path: terraform.tfstate
  resources:
    lb:
      type: aws_lb
      config:
        name: "lb-{{param.Env}}"
        subnets: ["{{tf.aws_subnet.a.id}}"]
    a:
      type: aws_subnet
      config:
        cidr_block: 10.0.0.0/24
  outputs:
    topic:
      value: "{{cloud.Topic.Ref}}"
outputs:
  DnsName:
    value: "{{tf.aws_lb.lb.dns_name}}"
    description: load balancer
"#;

    #[test]
    fn test_tb007_build_declares_graphs() {
        let config = parse_config(CONFIG).unwrap();
        let graph = build(&config, &std::env::temp_dir().join("tb007-build")).unwrap();
        assert_eq!(graph.stack.id(), "aws-stack");
        assert_eq!(graph.tf_stack.id(), "terraform");
        assert_eq!(graph.adapter.node().id(), "Terraform");
        assert_eq!(graph.adapter.app().stacks().len(), 1);
    }

    #[test]
    fn test_tb007_synth_bridges_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let config = parse_config(CONFIG).unwrap();
        let asm = synth(&config, dir.path()).unwrap();
        let t = asm.template("aws-stack").unwrap();

        let dns = &t["Outputs"]["DnsName"];
        assert_eq!(dns["Description"], "load balancer");
        assert!(dns["Value"]["Fn::GetAtt"][1].as_str().unwrap().starts_with("cdk-out-"));
        assert_eq!(t["Parameters"]["Env"]["Default"], "dev");

        let tf_dir = dir.path().join("cdktf.out").join("aws-stack").join("Terraform");
        let doc = crate::core::artifact::read_json(&tf_dir.join("stacks/terraform/cdk.tf.json")).unwrap();
        assert_eq!(doc["resource"]["aws_lb"]["lb"]["subnets"][0], "${aws_subnet.a.id}");
        let name = doc["resource"]["aws_lb"]["lb"]["name"].as_str().unwrap();
        assert!(name.starts_with("lb-${var.cdk-"));
        assert!(doc["terraform"]["backend"]["s3"].is_object());
        assert!(doc["terraform"]["backend"].get("local").is_none());
        assert!(!eventlog::read_events(&tf_dir).unwrap().is_empty());
    }

    #[test]
    fn test_tb007_repeated_synth_is_deterministic() {
        let config = parse_config(CONFIG).unwrap();
        let doc_of = |dir: &Path| {
            let tf_dir = dir.join("cdktf.out").join("aws-stack").join("Terraform");
            crate::core::artifact::read_json(&tf_dir.join("stacks/terraform/cdk.tf.json")).unwrap()
        };
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let a = synth(&config, first.path()).unwrap();
        let b = synth(&config, second.path()).unwrap();
        assert_eq!(doc_of(first.path()), doc_of(second.path()));
        assert_eq!(
            a.template("aws-stack").unwrap()["Outputs"],
            b.template("aws-stack").unwrap()["Outputs"]
        );
    }
}
