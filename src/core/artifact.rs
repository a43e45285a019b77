//! TB-004: Synthesized artifacts — atomic JSON writes and reads.

use super::error::{BridgeError, Result};
use serde_json::Value;
use std::path::Path;

/// Write pretty JSON atomically (write to temp, then rename).
pub fn write_json_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BridgeError::io("create dir", parent, e))?;
    }

    let json = serde_json::to_string_pretty(value)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(|e| BridgeError::io("write", &tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| BridgeError::io("rename into", path, e))?;

    Ok(())
}

/// Read a JSON document from disk.
pub fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| BridgeError::io("read", path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tb004_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stacks").join("s").join("cdk.tf.json");
        write_json_atomic(&path, &json!({ "terraform": { "backend": { "s3": {} } } })).unwrap();
        let back = read_json(&path).unwrap();
        assert_eq!(back["terraform"]["backend"], json!({ "s3": {} }));
    }

    #[test]
    fn test_tb004_atomic_write_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write_json_atomic(&path, &json!({})).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn test_tb004_read_missing() {
        let err = read_json(Path::new("/nonexistent/manifest.json")).err().unwrap();
        assert!(err.to_string().contains("cannot read"));
    }
}
