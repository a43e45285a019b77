//! Provisioning graph — Terraform-style constructs synthesized to JSON.

pub mod app;
pub mod elements;
pub mod resolve;

pub use app::{TfApp, TfAssembly};
pub use elements::{
    add_override, stack_of, stack_overrides, OutputConfig, TerraformAsset, TerraformBackend, TerraformOutput,
    TerraformProvider, TerraformResource, TerraformStack, TerraformVariable, TfKind, TfNode,
    VariableConfig,
};
pub use resolve::{TfResolvable, TfResolveContext};
