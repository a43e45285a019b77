//! TB-001: Error type shared by both graphs and the bridge.

use std::path::Path;
use thiserror::Error;

/// Everything that can abort a synthesis run.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The embedded provisioning app has no stack.
    #[error("No Stack constructed. app should have a TerraformStack associated with it.")]
    NoStack,

    /// The embedded provisioning app has more than one stack.
    #[error(
        "Multiple stacks to one app is not supported currently ({count} found). \
         Please create one TerraformStackAdapter per stack."
    )]
    MultipleStacks { count: usize },

    /// Two siblings with the same id.
    #[error("there is already a construct with name '{id}' in '{parent}'")]
    DuplicateConstruct { parent: String, id: String },

    /// A construct that needs a stack was placed outside of one.
    #[error("'{path}' is not inside a {kind}")]
    NoEnclosingStack { path: String, kind: &'static str },

    /// An ascending reference was resolved from a second provisioning stack.
    #[error(
        "input '{variable}' was declared in stack '{first}' and cannot be resolved again from '{second}'"
    )]
    ScopeMismatch {
        variable: String,
        first: String,
        second: String,
    },

    /// A string carries a token marker this thread never registered.
    #[error("unrecognized token key: {0}")]
    UnknownToken(String),

    /// Token values kept resolving to more tokens.
    #[error("token resolution exceeded depth {0}")]
    ResolutionDepth(usize),

    /// A post-synthesis check rejected an emitted template.
    #[error("validation failed for '{stack}': {message}")]
    Validation { stack: String, message: String },

    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Invalid bridge configuration.
    #[error("config: {0}")]
    Config(String),

    /// Deploy-time executor failure.
    #[error("deployer: {0}")]
    Deployer(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context: format!("cannot {} {}", action, path.display()),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb001_fatal_messages() {
        assert!(BridgeError::NoStack.to_string().contains("No Stack constructed"));
        let multi = BridgeError::MultipleStacks { count: 2 };
        assert!(multi.to_string().contains("Multiple stacks"));
        assert!(multi.to_string().contains("2 found"));
    }

    #[test]
    fn test_tb001_io_context() {
        let e = BridgeError::io(
            "read",
            Path::new("/nope/cdk.tf.json"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        let msg = e.to_string();
        assert!(msg.starts_with("cannot read /nope/cdk.tf.json"));
    }
}
