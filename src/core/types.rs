//! TB-005: Bridge configuration schema and provenance events.
//!
//! `bridge.yaml` declares one cloud stack with parameters, resources and
//! outputs, plus one embedded provisioning stack. String values may carry
//! `{{...}}` templates (see `core::template`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Top-level bridge.yaml
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// The cloud stack hosting the adapter
    pub stack: StackConfig,

    /// Template parameters (order-preserving)
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterConfig>,

    /// Plain cloud resources
    #[serde(default)]
    pub resources: IndexMap<String, CloudResourceConfig>,

    /// The embedded provisioning stack
    pub terraform: TerraformConfig,

    /// Template outputs
    #[serde(default)]
    pub outputs: IndexMap<String, OutputDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub name: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// CloudFormation parameter type
    #[serde(rename = "type", default = "default_parameter_type")]
    pub param_type: String,

    #[serde(default)]
    pub default: Option<serde_yaml_ng::Value>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub no_echo: bool,
}

fn default_parameter_type() -> String {
    "String".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudResourceConfig {
    /// e.g. `AWS::SNS::Topic`
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub properties: serde_yaml_ng::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    pub value: String,

    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Provisioning stack
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformConfig {
    /// Construct id of the adapter in the cloud stack
    #[serde(default = "default_adapter_id")]
    pub id: String,

    /// Provisioning stack id
    #[serde(default = "default_tf_stack")]
    pub stack: String,

    /// Provider name to provider block
    #[serde(default)]
    pub providers: IndexMap<String, serde_yaml_ng::Value>,

    /// A custom backend; dropped during bridging in favour of s3
    #[serde(default)]
    pub backend: Option<BackendConfig>,

    #[serde(default)]
    pub resources: IndexMap<String, TfResourceConfig>,

    #[serde(default)]
    pub outputs: IndexMap<String, OutputDecl>,
}

fn default_adapter_id() -> String {
    "Terraform".to_string()
}

fn default_tf_stack() -> String {
    "terraform".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend_type: String,

    #[serde(default)]
    pub config: serde_yaml_ng::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfResourceConfig {
    /// e.g. `aws_s3_bucket`
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub config: serde_yaml_ng::Value,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log of a bridging session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    BridgeStarted {
        adapter: String,
        run_id: String,
        version: String,
    },
    OutputDeclared {
        output: String,
    },
    BackendRemoved {
        construct: String,
    },
    VariableCollected {
        variable: String,
    },
    DeployerRegistered {
        resource: String,
        asset_hash: String,
    },
    ReferencePatched {
        output: String,
    },
    BridgeCompleted {
        run_id: String,
        outputs: u32,
        variables: u32,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: BridgeEvent,
}

// ============================================================================
// YAML helpers
// ============================================================================

/// Convert a YAML value to JSON; non-string mapping keys are stringified.
pub fn yaml_to_json(val: &serde_yaml_ng::Value) -> serde_json::Value {
    use serde_yaml_ng::Value as Y;
    match val {
        Y::Null => serde_json::Value::Null,
        Y::Bool(b) => serde_json::Value::Bool(*b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64().map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
            }
        }
        Y::String(s) => serde_json::Value::String(s.clone()),
        Y::Sequence(items) => serde_json::Value::Array(items.iter().map(yaml_to_json).collect()),
        Y::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(yaml_value_to_string(k), yaml_to_json(v));
            }
            serde_json::Value::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Convert a scalar YAML value to a string.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}
