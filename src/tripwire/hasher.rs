//! TB-015: BLAKE3 content hashing for assets and synthesized bundles.

use crate::core::error::{BridgeError, Result};
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| BridgeError::io("open", path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| BridgeError::io("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a directory tree: sorted walk, relative paths are part of the digest.
/// Symlinks are skipped.
pub fn hash_directory(path: &Path) -> Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();
    walk(path, path, &mut entries)?;

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

fn walk(base: &Path, current: &Path, entries: &mut Vec<(String, String)>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| BridgeError::io("read dir", current, e))?;
    let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let path = entry.path();
        let ft = entry.file_type().map_err(|e| BridgeError::io("stat", &path, e))?;
        if ft.is_symlink() {
            continue;
        }
        let rel = path
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if ft.is_file() {
            entries.push((rel, hash_file(&path)?));
        } else if ft.is_dir() {
            walk(base, &path, entries)?;
        }
    }
    Ok(())
}

/// Strip the `blake3:` prefix.
pub fn hex(digest: &str) -> &str {
    digest.strip_prefix("blake3:").unwrap_or(digest)
}
