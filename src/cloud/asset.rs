//! TB-013: File assets — content-hashed zip bundles uploaded next to the template.

use super::elements::{CloudKind, CloudNode, Resource};
use super::resolve::Intrinsic;
use crate::core::error::{BridgeError, Result};
use crate::tripwire::hasher;
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use zip::write::SimpleFileOptions;

/// Bootstrap bucket holding file assets.
pub const ASSETS_BUCKET: &str = "cdk-hnb659fds-assets-${AWS::AccountId}-${AWS::Region}";

/// Payload of an asset construct.
#[derive(Debug, Clone)]
pub struct AssetSource {
    pub path: PathBuf,
    /// BLAKE3 hex of the source contents.
    pub hash: String,
}

impl AssetSource {
    pub fn object_key(&self) -> String {
        format!("{}.zip", self.hash)
    }
}

#[derive(Clone)]
pub struct Asset {
    node: Rc<CloudNode>,
    source: AssetSource,
}

impl Asset {
    /// Declare a file or directory asset. The source is hashed immediately.
    pub fn new(scope: &Rc<CloudNode>, id: &str, path: &Path) -> Result<Self> {
        let digest = if path.is_dir() {
            hasher::hash_directory(path)?
        } else {
            hasher::hash_file(path)?
        };
        let source = AssetSource {
            path: path.to_path_buf(),
            hash: hasher::hex(&digest).to_string(),
        };
        let node = scope.add_child(id, CloudKind::Asset(source.clone()))?;
        Ok(Self { node, source })
    }

    pub fn node(&self) -> &Rc<CloudNode> {
        &self.node
    }

    pub fn hash(&self) -> &str {
        &self.source.hash
    }

    /// Bucket name token (`Fn::Sub` over the bootstrap bucket).
    pub fn bucket_name(&self) -> String {
        Intrinsic::token(json!({ "Fn::Sub": ASSETS_BUCKET }))
    }

    pub fn object_key(&self) -> String {
        self.source.object_key()
    }

    /// Attach a policy letting `role` read the bundle.
    pub fn grant_read(&self, role: &Resource) -> Result<Resource> {
        let arn = |suffix: &str| {
            Intrinsic::token(json!({
                "Fn::Sub": format!("arn:${{AWS::Partition}}:s3:::{}{}", ASSETS_BUCKET, suffix)
            }))
        };
        let id = format!("ReadPolicy{}", self.node.children().len());
        Resource::new(
            &self.node,
            &id,
            "AWS::IAM::Policy",
            json!({
                "PolicyName": format!("{}-read", self.node.id()),
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": ["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
                        "Resource": [arn(""), arn("/*")],
                    }],
                },
                "Roles": [role.ref_token()],
            }),
        )
    }
}

/// Zip every asset under `root` into `outdir`; returns manifest entries by hash.
pub fn stage_all(root: &Rc<CloudNode>, outdir: &Path) -> Result<Map<String, Value>> {
    let mut entries = Map::new();
    for node in root.find_all() {
        let source = match &*node.kind() {
            CloudKind::Asset(s) => s.clone(),
            _ => continue,
        };
        let file = format!("asset.{}", source.object_key());
        let target = outdir.join(&file);
        if !target.exists() {
            std::fs::create_dir_all(outdir).map_err(|e| BridgeError::io("create", outdir, e))?;
            zip_path(&source.path, &target)?;
        }
        entries.insert(
            source.hash.clone(),
            json!({
                "packaging": "zip",
                "path": file,
                "sourcePath": source.path.display().to_string(),
                "objectKey": source.object_key(),
            }),
        );
    }
    Ok(entries)
}

/// Zip a file or a directory tree (sorted, relative names).
pub fn zip_path(source: &Path, target: &Path) -> Result<()> {
    let file = File::create(target).map_err(|e| BridgeError::io("create", target, e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    if source.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "asset".to_string());
        add_file(&mut zip, source, &name, options)?;
    } else {
        add_dir(&mut zip, source, source, options)?;
    }
    zip.finish()?;
    Ok(())
}

fn add_dir(
    zip: &mut zip::ZipWriter<File>,
    base: &Path,
    current: &Path,
    options: SimpleFileOptions,
) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| BridgeError::io("read dir", current, e))?;
    let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let path = entry.path();
        let rel = path
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if path.is_dir() {
            zip.add_directory(format!("{}/", rel), options)?;
            add_dir(zip, base, &path, options)?;
        } else if path.is_file() {
            add_file(zip, &path, &rel, options)?;
        }
    }
    Ok(())
}

fn add_file(
    zip: &mut zip::ZipWriter<File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let bytes = std::fs::read(path).map_err(|e| BridgeError::io("read", path, e))?;
    zip.start_file(name, options)?;
    zip.write_all(&bytes).map_err(|e| BridgeError::io("write zip entry for", path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::app::CloudApp;
    use crate::cloud::elements::{Stack, StackProps};

    #[test]
    fn test_tb013_asset_hash_and_key() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "aaa").unwrap();
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let asset = Asset::new(&stack, "Bundle", src.path()).unwrap();
        assert_eq!(asset.hash().len(), 64);
        assert_eq!(asset.object_key(), format!("{}.zip", asset.hash()));
        assert!(asset.bucket_name().starts_with("${Token["));
    }

    #[test]
    fn test_tb013_stage_zips_directory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub").join("b.txt"), "bbb").unwrap();
        let out = tempfile::tempdir().unwrap();
        let app = CloudApp::new(out.path());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let asset = Asset::new(&stack, "Bundle", src.path()).unwrap();

        let entries = stage_all(app.node(), out.path()).unwrap();
        assert!(entries.contains_key(asset.hash()));
        let zipped = out.path().join(format!("asset.{}", asset.object_key()));
        let mut archive = zip::ZipArchive::new(File::open(zipped).unwrap()).unwrap();
        assert!(archive.by_name("sub/b.txt").is_ok());
    }

    #[test]
    fn test_tb013_grant_read_creates_policy() {
        let src = tempfile::tempdir().unwrap();
        let app = CloudApp::new(&std::env::temp_dir());
        let stack = Stack::new(&app, "s", StackProps::default()).unwrap();
        let role = Resource::new(&stack, "Role", "AWS::IAM::Role", json!({})).unwrap();
        let asset = Asset::new(&stack, "Bundle", src.path()).unwrap();
        let policy = asset.grant_read(&role).unwrap();
        match &*policy.node().kind() {
            CloudKind::Resource(r) => {
                assert_eq!(r.resource_type, "AWS::IAM::Policy");
                assert_eq!(r.properties["Roles"][0], json!(role.ref_token()));
            }
            _ => panic!("expected resource"),
        };
    }
}
