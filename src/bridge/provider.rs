//! TB-035: Custom-resource provider framework in front of the deployer function.
//!
//! The deployer custom resource never targets the deployer function
//! directly. A small framework function receives the lifecycle event,
//! invokes the user handler named by `USER_ON_EVENT_FUNCTION_ARN` and
//! reports the result back to CloudFormation. The service token of the
//! custom resource is the framework function's Arn.

use crate::cloud::resolve::Intrinsic;
use crate::cloud::{CloudKind, CloudNode, Resource};
use crate::core::error::Result;
use serde_json::json;
use std::rc::Rc;

/// Environment variable naming the user handler the framework invokes.
pub const USER_ON_EVENT_ENV: &str = "USER_ON_EVENT_FUNCTION_ARN";
pub const FRAMEWORK_ON_EVENT_ID: &str = "framework-onEvent";

/// Execution role assumable by Lambda, with the basic execution policy.
pub fn lambda_role(scope: &Rc<CloudNode>, id: &str) -> Result<Resource> {
    Resource::new(
        scope,
        id,
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": "lambda.amazonaws.com" },
                }],
            },
            "ManagedPolicyArns": [Intrinsic::token(json!({
                "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"
            }))],
        }),
    )
}

pub struct ProviderFramework {
    node: Rc<CloudNode>,
    on_event: Resource,
}

impl ProviderFramework {
    /// Framework function dispatching to `handler`, with a role allowed to invoke it.
    pub fn new(scope: &Rc<CloudNode>, id: &str, handler: &Resource, code_image: &str) -> Result<Self> {
        let node = scope.add_child(id, CloudKind::Construct)?;
        let group = node.add_child(FRAMEWORK_ON_EVENT_ID, CloudKind::Construct)?;
        let role = lambda_role(&group, "ServiceRole")?;

        let handler_arn = handler.get_att("Arn");
        Resource::new(
            &group,
            "ServiceRoleDefaultPolicy",
            "AWS::IAM::Policy",
            json!({
                "PolicyName": format!("{}-invoke", node.id()),
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": "lambda:InvokeFunction",
                        "Resource": [handler_arn.clone(), format!("{}:*", handler_arn)],
                    }],
                },
                "Roles": [role.ref_token()],
            }),
        )?;

        let on_event = Resource::new(
            &group,
            "Function",
            "AWS::Lambda::Function",
            json!({
                "PackageType": "Image",
                "Code": { "ImageUri": code_image },
                "ImageConfig": { "Command": ["framework.onEvent"] },
                "Role": role.get_att("Arn"),
                "Description": format!("provider framework for {}", node.path()),
                "Environment": { "Variables": { USER_ON_EVENT_ENV: handler_arn } },
                "Timeout": 900,
            }),
        )?;
        Ok(Self { node, on_event })
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.node
    }

    pub fn on_event(&self) -> &Resource {
        &self.on_event
    }

    /// Arn of the framework function, used as the custom resource service token.
    pub fn service_token(&self) -> String {
        self.on_event.get_att("Arn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudApp, Stack, StackProps};

    #[test]
    fn test_tb035_framework_invokes_handler() {
        let dir = tempfile::tempdir().unwrap();
        let app = CloudApp::new(dir.path());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let role = lambda_role(&stack, "HandlerRole").unwrap();
        let handler = Resource::new(
            &stack,
            "Handler",
            "AWS::Lambda::Function",
            json!({ "Role": role.get_att("Arn") }),
        )
        .unwrap();
        let provider = ProviderFramework::new(&stack, "provider", &handler, "image:latest").unwrap();

        let asm = app.synth().unwrap();
        let template = asm.template("s").unwrap();
        let handler_id = handler.logical_id().unwrap();
        let on_event_id = provider.on_event().logical_id().unwrap();
        assert_ne!(handler_id, on_event_id);

        let function = &template["Resources"][on_event_id.as_str()];
        assert_eq!(function["Type"], "AWS::Lambda::Function");
        assert_eq!(
            function["Properties"]["Environment"]["Variables"][USER_ON_EVENT_ENV],
            json!({ "Fn::GetAtt": [handler_id, "Arn"] })
        );
        let policies: Vec<_> = template["Resources"]
            .as_object()
            .unwrap()
            .values()
            .filter(|r| r["Type"] == "AWS::IAM::Policy")
            .collect();
        assert_eq!(policies.len(), 1);
        let statement = &policies[0]["Properties"]["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], "lambda:InvokeFunction");
        assert_eq!(statement["Resource"][0], json!({ "Fn::GetAtt": [handler_id, "Arn"] }));
        assert_eq!(provider.service_token(), provider.on_event().get_att("Arn"));
    }
}
