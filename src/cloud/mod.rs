//! Cloud-resource graph — CloudFormation-style constructs evaluated eagerly.

pub mod app;
pub mod asset;
pub mod elements;
pub mod resolve;

pub use app::{attach_custom_synthesis, CloudApp, CloudAssembly};
pub use elements::{CfnParameter, CloudKind, CloudNode, Output, Parameter, Resource, Stack, StackProps};
pub use resolve::{CloudResolvable, Reference, ResolveContext, TypeHint};
