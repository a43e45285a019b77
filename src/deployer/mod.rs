//! TB-040: Deploy-time executor contract.
//!
//! The deployer custom resource receives [`DeployerProperties`] in a
//! CloudFormation on-event request, materializes a Terraform working
//! directory and runs init/apply (or destroy) against the s3 backend.
//! Command execution goes through [`CommandRunner`] so the handler can be
//! driven without a real Terraform binary.

pub mod local;

use crate::core::error::{BridgeError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

/// State object key inside the backend bucket.
pub const STATE_KEY: &str = "tfstate";

/// Properties of the `TerraformDeployer` custom resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployerProperties {
    #[serde(rename = "TFStackAssetsBucketName")]
    pub assets_bucket_name: String,

    #[serde(rename = "TFStackAssetsObjectKey")]
    pub assets_object_key: String,

    /// The synthesized provisioning document. Kept inline so that template
    /// diffs show provisioning changes.
    #[serde(rename = "Terraform")]
    pub terraform: Value,

    /// Input variable name to cloud-side value.
    #[serde(rename = "Variables")]
    pub variables: IndexMap<String, String>,

    #[serde(rename = "S3BackendBucket")]
    pub backend_bucket: String,

    #[serde(rename = "S3BackendBucketRegion")]
    pub backend_bucket_region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Custom-resource lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OnEventRequest {
    pub request_type: RequestType,
    pub resource_properties: DeployerProperties,
    #[serde(default)]
    pub old_resource_properties: Option<Value>,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Handler result. Failures are reported in `error`, never raised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OnEventResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_output: Option<String>,
}

/// Output from running one command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `terraform <args>` in a working directory.
pub trait CommandRunner {
    fn run(&mut self, args: &[String], cwd: &Path) -> Result<ExecOutput>;
}

fn init_args(props: &DeployerProperties) -> Vec<String> {
    vec![
        "init".to_string(),
        "--input=false".to_string(),
        format!("--backend-config=bucket={}", props.backend_bucket),
        format!("--backend-config=region={}", props.backend_bucket_region),
        format!("--backend-config=key={}", STATE_KEY),
    ]
}

fn apply_args() -> Vec<String> {
    vec!["apply".into(), "--auto-approve".into(), "--input=false".into()]
}

fn destroy_args() -> Vec<String> {
    vec![
        "apply".into(),
        "--destroy".into(),
        "--auto-approve".into(),
        "--input=false".into(),
    ]
}

fn output_args() -> Vec<String> {
    vec!["output".into(), "--json".into()]
}

/// Commands run for a request, in order. A failed apply is followed by a destroy.
pub fn command_plan(request_type: RequestType, props: &DeployerProperties) -> Vec<Vec<String>> {
    match request_type {
        RequestType::Create | RequestType::Update => vec![init_args(props), apply_args(), output_args()],
        RequestType::Delete => vec![init_args(props), destroy_args()],
    }
}

/// Write the document, the variables and the extracted bundle into `dir`.
pub fn materialize_workdir(dir: &Path, props: &DeployerProperties, bundle: &Path) -> Result<()> {
    let assets = dir.join("assets");
    let file = File::open(bundle).map_err(|e| BridgeError::io("open", bundle, e))?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(&assets)?;

    let vars = dir.join("terraform.tfvars.json");
    std::fs::write(&vars, serde_json::to_string(&props.variables)?).map_err(|e| BridgeError::io("write", &vars, e))?;
    let main = dir.join("main.tf.json");
    std::fs::write(&main, serde_json::to_string(&props.terraform)?).map_err(|e| BridgeError::io("write", &main, e))?;
    Ok(())
}

/// Process one lifecycle event. The working directory is removed afterwards.
///
/// A Create answers with the request id as physical id; Update and Delete
/// echo the id they were given.
pub fn handle(request: &OnEventRequest, bundle: &Path, runner: &mut dyn CommandRunner) -> OnEventResponse {
    let mut response = match run_request(request, bundle, runner) {
        Ok(response) => response,
        Err(Failure { message, output }) => {
            warn!(error = %message, "deployer request failed");
            OnEventResponse {
                error: Some(message),
                command_output: output,
                ..Default::default()
            }
        }
    };
    if response.physical_resource_id.is_none() {
        response.physical_resource_id = match request.request_type {
            RequestType::Create => request.request_id.clone(),
            RequestType::Update | RequestType::Delete => request.physical_resource_id.clone(),
        };
    }
    response
}

struct Failure {
    message: String,
    output: Option<String>,
}

impl From<BridgeError> for Failure {
    fn from(e: BridgeError) -> Self {
        Self {
            message: e.to_string(),
            output: None,
        }
    }
}

fn run(runner: &mut dyn CommandRunner, args: &[String], cwd: &Path) -> std::result::Result<ExecOutput, Failure> {
    info!(command = %args.join(" "), "running terraform");
    let out = runner.run(args, cwd)?;
    if out.success() {
        Ok(out)
    } else {
        Err(Failure {
            message: format!("Process exited with code {}.", out.exit_code),
            output: Some(format!("{}{}", out.stdout, out.stderr)),
        })
    }
}

fn run_request(
    request: &OnEventRequest,
    bundle: &Path,
    runner: &mut dyn CommandRunner,
) -> std::result::Result<OnEventResponse, Failure> {
    let dir = tempfile::Builder::new()
        .prefix("deploy")
        .tempdir()
        .map_err(|e| BridgeError::io("create", &std::env::temp_dir(), e))?;
    let props = &request.resource_properties;
    materialize_workdir(dir.path(), props, bundle)?;

    let plan = command_plan(request.request_type, props);
    match request.request_type {
        RequestType::Create | RequestType::Update => {
            run(runner, &plan[0], dir.path())?;
            if let Err(failure) = run(runner, &plan[1], dir.path()) {
                run(runner, &destroy_args(), dir.path())?;
                return Err(failure);
            }
            let out = run(runner, &plan[2], dir.path())?;
            Ok(OnEventResponse {
                data: Some(parse_outputs(&out.stdout)?),
                ..Default::default()
            })
        }
        RequestType::Delete => {
            for args in &plan {
                run(runner, args, dir.path())?;
            }
            Ok(OnEventResponse::default())
        }
    }
}

/// `terraform output --json` to output name → value.
pub fn parse_outputs(json: &str) -> Result<Map<String, Value>> {
    let parsed: Map<String, Value> = serde_json::from_str(json)?;
    Ok(parsed
        .into_iter()
        .map(|(name, entry)| {
            let value = entry.get("value").cloned().unwrap_or(Value::Null);
            (name, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn props() -> DeployerProperties {
        DeployerProperties {
            assets_bucket_name: "assets".into(),
            assets_object_key: "abc.zip".into(),
            terraform: json!({ "terraform": { "backend": { "s3": {} } } }),
            variables: IndexMap::from([("cdk-Ref-1".to_string(), "hello".to_string())]),
            backend_bucket: "state-bucket".into(),
            backend_bucket_region: "us-east-1".into(),
        }
    }

    fn bundle(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("bundle.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("lambda/index.js", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"exports.handler = () => {}").unwrap();
        zip.finish().unwrap();
        path
    }

    /// Records commands; fails any command whose first two args match `fail`.
    struct FakeRunner {
        calls: Vec<Vec<String>>,
        fail: Option<(&'static str, &'static str)>,
        seen_files: bool,
    }

    impl FakeRunner {
        fn new(fail: Option<(&'static str, &'static str)>) -> Self {
            Self { calls: Vec::new(), fail, seen_files: false }
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&mut self, args: &[String], cwd: &Path) -> Result<ExecOutput> {
            self.calls.push(args.to_vec());
            self.seen_files = cwd.join("main.tf.json").exists()
                && cwd.join("terraform.tfvars.json").exists()
                && cwd.join("assets").join("lambda").join("index.js").exists();
            let failing = self
                .fail
                .is_some_and(|(a, b)| args.first().map(String::as_str) == Some(a) && args.get(1).map(String::as_str) == Some(b));
            let stdout = if args[0] == "output" {
                json!({ "cdk-out-4": { "value": "https://example.com", "type": "string" } }).to_string()
            } else {
                String::new()
            };
            Ok(ExecOutput { exit_code: if failing { 1 } else { 0 }, stdout, stderr: String::new() })
        }
    }

    #[test]
    fn test_tb040_property_names() {
        let v = serde_json::to_value(props()).unwrap();
        let keys: Vec<&String> = v.as_object().unwrap().keys().collect();
        for k in [
            "TFStackAssetsBucketName",
            "TFStackAssetsObjectKey",
            "Terraform",
            "Variables",
            "S3BackendBucket",
            "S3BackendBucketRegion",
        ] {
            assert!(keys.iter().any(|key| key.as_str() == k), "missing {}", k);
        }
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_tb040_command_plans() {
        let p = props();
        let create = command_plan(RequestType::Create, &p);
        assert_eq!(create.len(), 3);
        assert_eq!(create[0][0], "init");
        assert!(create[0].contains(&"--backend-config=bucket=state-bucket".to_string()));
        assert!(create[0].contains(&"--backend-config=key=tfstate".to_string()));
        assert_eq!(create[1], vec!["apply", "--auto-approve", "--input=false"]);
        assert_eq!(command_plan(RequestType::Update, &p), create);
        let delete = command_plan(RequestType::Delete, &p);
        assert_eq!(delete[1][1], "--destroy");
    }

    #[test]
    fn test_tb040_create_returns_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let request = OnEventRequest {
            request_type: RequestType::Create,
            resource_properties: props(),
            old_resource_properties: None,
            physical_resource_id: None,
            request_id: Some("req-1".into()),
        };
        let mut runner = FakeRunner::new(None);
        let response = handle(&request, &bundle(dir.path()), &mut runner);
        assert!(response.error.is_none());
        assert_eq!(response.physical_resource_id.as_deref(), Some("req-1"));
        assert_eq!(response.data.unwrap()["cdk-out-4"], "https://example.com");
        assert_eq!(runner.calls.len(), 3);
        assert!(runner.seen_files);
    }

    #[test]
    fn test_tb040_failed_apply_destroys() {
        let dir = tempfile::tempdir().unwrap();
        let request = OnEventRequest {
            request_type: RequestType::Update,
            resource_properties: props(),
            old_resource_properties: None,
            physical_resource_id: Some("pid".into()),
            request_id: None,
        };
        let mut runner = FakeRunner::new(Some(("apply", "--auto-approve")));
        let response = handle(&request, &bundle(dir.path()), &mut runner);
        assert_eq!(response.error.as_deref(), Some("Process exited with code 1."));
        assert_eq!(response.physical_resource_id.as_deref(), Some("pid"));
        let last = runner.calls.last().unwrap();
        assert_eq!(last[1], "--destroy");
    }

    #[test]
    fn test_tb040_failed_create_still_has_physical_id() {
        let dir = tempfile::tempdir().unwrap();
        let request = OnEventRequest {
            request_type: RequestType::Create,
            resource_properties: props(),
            old_resource_properties: None,
            physical_resource_id: None,
            request_id: Some("req-2".into()),
        };
        let mut runner = FakeRunner::new(Some(("apply", "--auto-approve")));
        let response = handle(&request, &bundle(dir.path()), &mut runner);
        assert!(response.error.is_some());
        assert_eq!(response.physical_resource_id.as_deref(), Some("req-2"));
    }

    #[test]
    fn test_tb040_delete() {
        let dir = tempfile::tempdir().unwrap();
        let request = OnEventRequest {
            request_type: RequestType::Delete,
            resource_properties: props(),
            old_resource_properties: None,
            physical_resource_id: Some("pid".into()),
            request_id: None,
        };
        let mut runner = FakeRunner::new(None);
        let response = handle(&request, &bundle(dir.path()), &mut runner);
        assert!(response.error.is_none());
        assert!(response.data.is_none());
        assert_eq!(runner.calls.len(), 2);
    }

    #[test]
    fn test_tb040_request_serde() {
        let raw = json!({
            "RequestType": "Create",
            "ResourceProperties": serde_json::to_value(props()).unwrap(),
        });
        let request: OnEventRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.request_type, RequestType::Create);
        assert_eq!(request.resource_properties.variables["cdk-Ref-1"], "hello");
    }

    #[test]
    fn test_tb040_missing_bundle_reports_error() {
        let request = OnEventRequest {
            request_type: RequestType::Create,
            resource_properties: props(),
            old_resource_properties: None,
            physical_resource_id: None,
            request_id: None,
        };
        let mut runner = FakeRunner::new(None);
        let response = handle(&request, Path::new("/nonexistent/bundle.zip"), &mut runner);
        assert!(response.error.unwrap().contains("cannot open"));
        assert!(runner.calls.is_empty());
    }
}
