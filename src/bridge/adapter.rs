//! TB-034: `TerraformStackAdapter` — a provisioning app embedded in a cloud stack.
//!
//! The adapter owns an embedded [`TfApp`], a deployer function shared by
//! every adapter of the cloud stack, and a retained state bucket. When the
//! cloud app synthesizes, a [`BridgingSession`] wires the two graphs
//! together:
//!
//! 1. locate the single provisioning stack
//! 2. declare a provisioning output for every descending reference
//! 3. force the s3 backend
//! 4. synthesize the provisioning app
//! 5. collect the ascending references into the variable map
//! 6. register the bundle asset and the deployer custom resource behind a
//!    provider framework
//! 7. point every descending reference at the deployer attribute

use super::diagnostics::{self, DiagnosticKind};
use super::provider::{lambda_role, ProviderFramework};
use super::reference::{AscendingReference, DescendingReference, UNDETERMINED};
use super::resolver::{find_cloud_tokens, find_tf_tokens};
use crate::cloud::app::{add_validation, attach_custom_synthesis, stack_elements};
use crate::cloud::asset::Asset;
use crate::cloud::elements::to_cloudformation;
use crate::cloud::resolve::{self as cloud_resolve, Intrinsic};
use crate::cloud::{CloudApp, CloudKind, CloudNode, Resource, Stack};
use crate::core::artifact;
use crate::core::error::{BridgeError, Result};
use crate::core::types::BridgeEvent;
use crate::deployer::DeployerProperties;
use crate::terraform::elements::{is_element, to_terraform};
use crate::terraform::resolve as tf_resolve;
use crate::terraform::{add_override, stack_overrides, OutputConfig, TerraformOutput, TfApp, TfAssembly, TfKind, TfNode};
use crate::tripwire::eventlog;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, info};

/// Stack-level construct holding the shared deployer function.
pub const HANDLER_ID: &str = "TerraformStackAdapterEventHandler";
pub const STATE_BUCKET_ID: &str = "TFStateBucket";
pub const ASSET_ID: &str = "TFCDKAssemblyAsset";
pub const DEPLOYER_ID: &str = "TerraformDeployer";
pub const DEPLOYER_TYPE: &str = "AWS::CloudFormation::CustomResource";
pub const PROVIDER_ID: &str = "provider";

/// Image repository of the deployer function.
const DEPLOYER_IMAGE: &str = "${AWS::AccountId}.dkr.ecr.${AWS::Region}.${AWS::URLSuffix}/\
                              cdk-hnb659fds-container-assets-${AWS::AccountId}-${AWS::Region}";

fn deployer_image() -> String {
    Intrinsic::token(json!({
        "Fn::Sub": format!("{}:tfbridge-deployer-{}", DEPLOYER_IMAGE, env!("CARGO_PKG_VERSION"))
    }))
}

/// Role and function of the deploy-time executor.
#[derive(Clone)]
pub struct DeployerHandler {
    pub role: Resource,
    pub function: Resource,
}

impl DeployerHandler {
    /// One per cloud stack; later adapters reuse the first one.
    fn singleton(stack: &Rc<CloudNode>) -> Result<Self> {
        if let Some(existing) = stack.try_find_child(HANDLER_ID) {
            if let (Some(role), Some(function)) =
                (existing.try_find_child("ServiceRole"), existing.try_find_child("Function"))
            {
                return Ok(Self {
                    role: Resource::from_node(role),
                    function: Resource::from_node(function),
                });
            }
        }

        let group = stack.add_child(HANDLER_ID, CloudKind::Construct)?;
        let role = lambda_role(&group, "ServiceRole")?;
        let image = deployer_image();
        let function = Resource::new(
            &group,
            "Function",
            "AWS::Lambda::Function",
            json!({
                "PackageType": "Image",
                "Code": { "ImageUri": image },
                "Role": role.get_att("Arn"),
                "EphemeralStorage": { "Size": 2048 },
                "Timeout": 900,
                "Architectures": ["arm64"],
                "MemorySize": 1024,
            }),
        )?;
        Ok(Self { role, function })
    }
}

/// Embeds one provisioning stack into the enclosing cloud stack.
pub struct TerraformStackAdapter {
    node: Rc<CloudNode>,
    app: TfApp,
    handler: DeployerHandler,
    state_bucket: Resource,
}

impl TerraformStackAdapter {
    pub fn new(scope: &Rc<CloudNode>, id: &str) -> Result<Self> {
        let node = scope.add_child(id, CloudKind::Construct)?;
        let cloud_stack = Stack::of(&node)?;

        let outdir = CloudApp::of(scope).outdir().join("cdktf.out").join(workdir_name(&node.path()));
        let app = TfApp::new(&outdir);
        let handler = DeployerHandler::singleton(&cloud_stack)?;
        let state_bucket = Resource::new(&node, STATE_BUCKET_ID, "AWS::S3::Bucket", json!({}))?;
        state_bucket.set_retain();

        add_validation(
            &node,
            Box::new(|template: &Value| {
                has_undetermined(template)
                    .then(|| format!("unresolved {} value left in template", UNDETERMINED))
            }),
        );

        let session = BridgingSession {
            node: Rc::clone(&node),
            cloud_stack,
            app: app.clone(),
            handler: handler.clone(),
            state_bucket: state_bucket.clone(),
        };
        attach_custom_synthesis(&node, Box::new(move || session.run()));

        debug!(adapter = %node.path(), outdir = %outdir.display(), "adapter created");
        Ok(Self {
            node,
            app,
            handler,
            state_bucket,
        })
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.node
    }

    /// The embedded provisioning app; add exactly one stack to it.
    pub fn app(&self) -> &TfApp {
        &self.app
    }

    pub fn handler(&self) -> &DeployerHandler {
        &self.handler
    }

    pub fn state_bucket(&self) -> &Resource {
        &self.state_bucket
    }
}

fn workdir_name(path: &str) -> PathBuf {
    path.split('/')
        .map(|c| {
            c.chars()
                .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' { ch } else { '_' })
                .collect::<String>()
        })
        .collect()
}

/// True when some string in `value` is exactly the placeholder of an unpatched reference.
fn has_undetermined(value: &Value) -> bool {
    match value {
        Value::String(s) => s == UNDETERMINED,
        Value::Array(items) => items.iter().any(has_undetermined),
        Value::Object(map) => map.values().any(has_undetermined),
        _ => false,
    }
}

/// State of one bridging pass, consumed by [`BridgingSession::run`].
struct BridgingSession {
    node: Rc<CloudNode>,
    cloud_stack: Rc<CloudNode>,
    app: TfApp,
    handler: DeployerHandler,
    state_bucket: Resource,
}

impl BridgingSession {
    fn run(self) -> Result<()> {
        let tf_stack = self.locate_stack()?;
        let run_id = eventlog::generate_run_id();
        info!(adapter = %self.node.path(), stack = %tf_stack.id(), run_id = %run_id, "bridging started");
        self.record(BridgeEvent::BridgeStarted {
            adapter: self.node.path(),
            run_id: run_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })?;

        let outputs = self.declare_outputs(&tf_stack)?;
        self.force_s3_backend(&tf_stack)?;

        let assembly = self.app.synth()?;
        let document = artifact::read_json(&assembly.document_path(tf_stack.id()))?;

        let variables = self.collect_variables(&tf_stack)?;
        let variable_count = variables.len();
        let deployer = self.register_deployer(&assembly, &tf_stack, document, variables)?;
        self.patch_descending(&deployer)?;

        info!(outputs, variables = variable_count, "bridging completed");
        self.record(BridgeEvent::BridgeCompleted {
            run_id,
            outputs: outputs as u32,
            variables: variable_count as u32,
        })
    }

    fn record(&self, event: BridgeEvent) -> Result<()> {
        eventlog::append_event(&self.app.outdir(), event)
    }

    /// Step 1.
    fn locate_stack(&self) -> Result<Rc<TfNode>> {
        let mut stacks = self.app.stacks();
        match stacks.len() {
            0 => Err(BridgeError::NoStack),
            1 => Ok(stacks.remove(0)),
            count => Err(BridgeError::MultipleStacks { count }),
        }
    }

    /// Descending references used by elements of the cloud stack, first-seen order.
    fn descending_references(&self) -> Result<Vec<Rc<DescendingReference>>> {
        let mut found: Vec<Rc<DescendingReference>> = Vec::new();
        for element in stack_elements(&self.cloud_stack) {
            let Some(fragment) = to_cloudformation(&element)? else {
                continue;
            };
            let serialized = Value::String(fragment.to_string());
            for token in find_cloud_tokens(&element, &serialized)? {
                if let Some(reference) = cloud_resolve::downcast::<DescendingReference>(&token) {
                    if !found.iter().any(|f| Rc::ptr_eq(f, &reference)) {
                        found.push(reference);
                    }
                }
            }
        }
        Ok(found)
    }

    /// Step 2.
    fn declare_outputs(&self, tf_stack: &Rc<TfNode>) -> Result<usize> {
        let mut declared = 0;
        for reference in self.descending_references()? {
            let name = reference.tf_output_name();
            if tf_stack.try_find_child(name).is_some() {
                continue;
            }
            TerraformOutput::new(
                tf_stack,
                name,
                OutputConfig {
                    value: Value::String(reference.tf_token()),
                    ..Default::default()
                },
            )?;
            debug!(output = %name, "declared provisioning output");
            self.record(BridgeEvent::OutputDeclared {
                output: name.to_string(),
            })?;
            declared += 1;
        }
        Ok(declared)
    }

    /// Step 3.
    fn force_s3_backend(&self, tf_stack: &Rc<TfNode>) -> Result<()> {
        add_override(tf_stack, "terraform.backend", json!({ "s3": {} }));
        for node in tf_stack.find_all() {
            let backend = match &*node.kind() {
                TfKind::Backend { backend, .. } => backend.clone(),
                _ => continue,
            };
            let path = node.path();
            diagnostics::warn(
                DiagnosticKind::UnsupportedBackend,
                format!(
                    "Custom Backend cannot be used currently. Only builtin S3 backend is supported. {} ({})",
                    backend, path
                ),
            );
            if let Some(parent) = node.parent() {
                parent.try_remove_child(node.id());
            }
            self.record(BridgeEvent::BackendRemoved { construct: path })?;
        }
        Ok(())
    }

    /// Step 5.
    fn collect_variables(&self, tf_stack: &Rc<TfNode>) -> Result<IndexMap<String, String>> {
        let mut scanned = Vec::new();
        for element in tf_stack.find_all().into_iter().filter(|n| is_element(n)) {
            if let Some(fragment) = to_terraform(&element)? {
                scanned.push((element, Value::String(fragment.to_string())));
            }
        }
        for (_, value) in stack_overrides(tf_stack) {
            scanned.push((Rc::clone(tf_stack), Value::String(value.to_string())));
        }

        let mut variables = IndexMap::new();
        for (scope, serialized) in scanned {
            for token in find_tf_tokens(&scope, &serialized)? {
                let Some(reference) = tf_resolve::downcast::<AscendingReference>(&token) else {
                    continue;
                };
                let name = reference.tf_variable_name().to_string();
                if variables.insert(name.clone(), reference.cloud_token()).is_none() {
                    self.record(BridgeEvent::VariableCollected { variable: name })?;
                }
            }
        }
        Ok(variables)
    }

    /// Step 6.
    fn register_deployer(
        &self,
        assembly: &TfAssembly,
        tf_stack: &Rc<TfNode>,
        document: Value,
        variables: IndexMap<String, String>,
    ) -> Result<Resource> {
        let asset = Asset::new(&self.node, ASSET_ID, &assembly.stack_dir(tf_stack.id()).join("assets"))?;
        asset.grant_read(&self.handler.role)?;

        let props = DeployerProperties {
            assets_bucket_name: asset.bucket_name(),
            assets_object_key: asset.object_key(),
            terraform: document,
            variables,
            backend_bucket: self.state_bucket.ref_token(),
            backend_bucket_region: Stack::region(&self.cloud_stack),
        };
        let mut properties = serde_json::to_value(&props)?;
        let provider = ProviderFramework::new(&self.node, PROVIDER_ID, &self.handler.function, &deployer_image())?;
        properties["ServiceToken"] = json!(provider.service_token());

        let deployer = Resource::new(&self.node, DEPLOYER_ID, DEPLOYER_TYPE, properties)?;
        self.record(BridgeEvent::DeployerRegistered {
            resource: deployer.node().path(),
            asset_hash: asset.hash().to_string(),
        })?;
        Ok(deployer)
    }

    /// Step 7.
    fn patch_descending(&self, deployer: &Resource) -> Result<()> {
        for reference in self.descending_references()? {
            reference.set_value(Value::String(deployer.get_att(reference.tf_output_name())));
            self.record(BridgeEvent::ReferencePatched {
                output: reference.tf_output_name().to_string(),
            })?;
        }
        Ok(())
    }
}
