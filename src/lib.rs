//! tfbridge — deferred values across two infrastructure graphs.
//!
//! A CloudFormation-style stack embeds a Terraform stack through a
//! `TerraformStackAdapter`. Tokens from either graph can be used in the
//! other: cloud values become Terraform variables, Terraform values come back
//! as attributes of the custom resource that deploys the embedded stack.

pub mod bridge;
pub mod cli;
pub mod cloud;
pub mod core;
pub mod deployer;
pub mod terraform;
pub mod tripwire;
