//! The bridge between the cloud graph and the embedded provisioning graph.

pub mod adapter;
pub mod convert;
pub mod diagnostics;
pub mod provider;
pub mod reference;
pub mod resolver;

pub use adapter::TerraformStackAdapter;
pub use convert::{ascend, descend, reset_registries};
pub use reference::{AscendingReference, DescendingReference, UNDETERMINED};
