//! TB-017: CLI subcommands — init, validate, synth, handle.

use crate::core::{builder, parser, types};
use crate::deployer::{self, local::LocalTerraform, OnEventRequest};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new bridge project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate bridge.yaml without synthesizing
    Validate {
        /// Path to bridge.yaml
        #[arg(short, long, default_value = "bridge.yaml")]
        file: PathBuf,
    },

    /// Synthesize the cloud assembly and the embedded provisioning app
    Synth {
        /// Path to bridge.yaml
        #[arg(short, long, default_value = "bridge.yaml")]
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "cdk.out")]
        outdir: PathBuf,
    },

    /// Run the deployer for one lifecycle event against a local terraform
    Handle {
        /// Path to the event JSON
        #[arg(short, long)]
        event: PathBuf,

        /// Zip bundle of the provisioning stack's assets
        #[arg(short, long)]
        bundle: PathBuf,

        /// Terraform binary
        #[arg(long, default_value = "terraform")]
        terraform: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth { file, outdir } => cmd_synth(&file, &outdir),
        Commands::Handle {
            event,
            bundle,
            terraform,
        } => cmd_handle(&event, &bundle, &terraform),
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: my-bridge
description: "Managed by tfbridge"

stack:
  name: app-stack

parameters: {}

resources: {}

terraform:
  id: Terraform
  stack: terraform
  providers:
    aws: {}
  resources: {}
  outputs: {}

outputs: {}
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("bridge.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, INIT_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized tfbridge project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    println!(
        "OK: {} ({} parameters, {} resources, {} terraform resources)",
        config.name,
        config.parameters.len(),
        config.resources.len(),
        config.terraform.resources.len()
    );
    Ok(())
}

fn cmd_synth(file: &Path, outdir: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let assembly = builder::synth(&config, outdir).map_err(|e| e.to_string())?;

    println!("Synthesized {} to {}", config.name, assembly.outdir.display());
    for name in assembly.templates.keys() {
        println!("  {}.template.json", name);
    }
    Ok(())
}

fn cmd_handle(event: &Path, bundle: &Path, terraform: &Path) -> Result<(), String> {
    let content =
        std::fs::read_to_string(event).map_err(|e| format!("cannot read {}: {}", event.display(), e))?;
    let request: OnEventRequest =
        serde_json::from_str(&content).map_err(|e| format!("invalid event {}: {}", event.display(), e))?;

    let mut runner = LocalTerraform::new(terraform);
    let response = deployer::handle(&request, bundle, &mut runner);
    let json = serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?;
    println!("{}", json);

    match response.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Parse and validate a bridge config file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<types::BridgeConfig, String> {
    let config = parser::parse_config_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
version: "1.0"
name: test
stack:
  name: aws-stack
parameters:
  Env:
    type: String
terraform:
  resources:
    bucket:
      type: aws_s3_bucket
      config:
        bucket: "data-{{param.Env}}"
outputs:
  BucketArn:
    value: "{{tf.aws_s3_bucket.bucket.arn}}"
"#;

    #[test]
    fn test_tb017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        cmd_init(&sub).unwrap();
        let config = parser::parse_config_file(&sub.join("bridge.yaml")).unwrap();
        assert!(parser::validate_config(&config).is_empty());
    }

    #[test]
    fn test_tb017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bridge.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_tb017_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bridge.yaml");
        std::fs::write(&config, CONFIG).unwrap();
        cmd_validate(&config).unwrap();
    }

    #[test]
    fn test_tb017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bridge.yaml");
        std::fs::write(&config, CONFIG.replace("1.0", "2.0")).unwrap();
        let result = cmd_validate(&config);
        assert!(result.unwrap_err().contains("validation"));
    }

    #[test]
    fn test_tb017_synth_writes_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bridge.yaml");
        std::fs::write(&config, CONFIG).unwrap();
        let out = dir.path().join("cdk.out");
        cmd_synth(&config, &out).unwrap();
        assert!(out.join("aws-stack.template.json").exists());
        assert!(out.join("manifest.json").exists());
        assert!(out.join("cdktf.out/aws-stack/Terraform/stacks/terraform/cdk.tf.json").exists());
    }

    #[test]
    fn test_tb017_synth_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_synth(&dir.path().join("nope.yaml"), dir.path()).unwrap_err();
        assert!(err.contains("cannot read"));
    }

    #[test]
    fn test_tb017_handle_invalid_event() {
        let dir = tempfile::tempdir().unwrap();
        let event = dir.path().join("event.json");
        std::fs::write(&event, "{}").unwrap();
        let err = cmd_handle(&event, &dir.path().join("bundle.zip"), Path::new("terraform")).unwrap_err();
        assert!(err.contains("invalid event"));
    }
}
