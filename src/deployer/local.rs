//! TB-041: Local Terraform runner.

use super::{CommandRunner, ExecOutput};
use crate::core::error::{BridgeError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Runs a Terraform binary as a child process.
pub struct LocalTerraform {
    binary: PathBuf,
}

impl LocalTerraform {
    pub fn new(binary: &Path) -> Self {
        Self {
            binary: binary.to_path_buf(),
        }
    }
}

impl Default for LocalTerraform {
    fn default() -> Self {
        Self::new(Path::new("terraform"))
    }
}

impl CommandRunner for LocalTerraform {
    fn run(&mut self, args: &[String], cwd: &Path) -> Result<ExecOutput> {
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BridgeError::io("spawn", &self.binary, e))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
