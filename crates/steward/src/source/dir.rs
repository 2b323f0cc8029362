//! Directory-backed manifest source.
//!
//! Each resolve walks the manifest tree under the application's source path
//! and fingerprints the content, so the revision id is a pure function of
//! the bytes on disk: unchanged content resolves to an identical revision.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::app::Application;
use crate::error::{Result, StewardError};
use crate::resource::{parse_manifest, DesiredResource, ParseFailure};
use crate::source::{Revision, RevisionId, SourceTracker};

/// Manifest source rooted at a local directory tree.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists manifest files under a source path in a stable order.
    fn manifest_files(&self, source_path: &str) -> Result<Vec<PathBuf>> {
        let dir = self.root.join(source_path);
        if !dir.exists() {
            return Err(StewardError::SourceUnavailable {
                source_ref: source_path.to_string(),
                message: format!("directory '{}' not found", dir.display()),
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            // Skip hidden files and directories.
            if let Ok(relative) = path.strip_prefix(&dir) {
                let hidden = relative.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
                });
                if hidden {
                    continue;
                }
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext == "yaml" || ext == "yml" {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl SourceTracker for DirectorySource {
    async fn resolve_latest(&self, app: &Application) -> Result<Revision> {
        let source_path = &app.spec.source.path;
        let dir = self.root.join(source_path);

        let mut hasher = Sha256::new();
        let mut resources: Vec<DesiredResource> = Vec::new();
        let mut parse_failures: Vec<ParseFailure> = Vec::new();

        for path in self.manifest_files(source_path)? {
            let content = fs::read_to_string(&path).map_err(|e| StewardError::ReadFile {
                path: path.clone(),
                source: e,
            })?;

            let relative = path.strip_prefix(&dir).unwrap_or(&path).to_path_buf();
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(content.as_bytes());
            hasher.update([0]);

            let (mut parsed, mut failures) = parse_manifest(&relative, &content);
            resources.append(&mut parsed);
            parse_failures.append(&mut failures);
        }

        let digest = hasher.finalize();
        let id = RevisionId(hex_encode(&digest));

        log::debug!(
            "Resolved source '{}' at revision {} ({} resources, {} parse failures)",
            source_path,
            id.short(),
            resources.len(),
            parse_failures.len()
        );

        Ok(Revision {
            id,
            resources,
            parse_failures,
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppSpec, Destination, SourceRef, SyncPolicy};
    use crate::resource::ResourceKind;
    use std::fs;
    use tempfile::TempDir;

    fn test_app(path: &str) -> Application {
        Application::new(
            "test",
            AppSpec {
                source: SourceRef {
                    path: path.to_string(),
                    revision: "latest".to_string(),
                },
                destination: Destination {
                    server: "in-cluster".to_string(),
                    namespace: "web".to_string(),
                },
                sync_policy: SyncPolicy::default(),
            },
        )
    }

    fn write_manifest(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    const CONFIG_MAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
  namespace: web
spec:
  data:
    key: value
"#;

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "app/cm.yaml", CONFIG_MAP);

        let source = DirectorySource::new(dir.path());
        let app = test_app("app");

        let first = source.resolve_latest(&app).await.unwrap();
        let second = source.resolve_latest(&app).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.resources, second.resources);
    }

    #[tokio::test]
    async fn test_revision_changes_with_content() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "app/cm.yaml", CONFIG_MAP);

        let source = DirectorySource::new(dir.path());
        let app = test_app("app");
        let first = source.resolve_latest(&app).await.unwrap();

        write_manifest(
            dir.path(),
            "app/cm.yaml",
            &CONFIG_MAP.replace("value", "other"),
        );
        let second = source.resolve_latest(&app).await.unwrap();

        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_parse_failures_are_per_document() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "app/cm.yaml", CONFIG_MAP);
        write_manifest(dir.path(), "app/broken.yaml", "kind: [not: valid");

        let source = DirectorySource::new(dir.path());
        let revision = source.resolve_latest(&test_app("app")).await.unwrap();

        assert_eq!(revision.resources.len(), 1);
        assert_eq!(revision.resources[0].kind, ResourceKind::ConfigMap);
        assert_eq!(revision.parse_failures.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_source_unavailable() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path());

        let err = source
            .resolve_latest(&test_app("does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, StewardError::SourceUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_hidden_files_skipped() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "app/cm.yaml", CONFIG_MAP);
        write_manifest(dir.path(), "app/.hidden/other.yaml", CONFIG_MAP);

        let source = DirectorySource::new(dir.path());
        let revision = source.resolve_latest(&test_app("app")).await.unwrap();
        assert_eq!(revision.resources.len(), 1);
    }
}
