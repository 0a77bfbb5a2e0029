//! Filesystem config deployment with checksummed backups.
//!
//! Layout under the backup root:
//!
//! ```text
//! <root>/<backup-id>/manifest.json
//! <root>/<backup-id>/<file name>
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rigup_core::{BackupInfo, BackupStore, ConfigDeployer, ConfigFileSpec, DeployResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::templates::render;

const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BackupManifest {
    id: String,
    original: PathBuf,
    file_name: String,
    sha256: String,
    created_at: DateTime<Utc>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sortable, unique backup id.
fn new_backup_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8])
}

fn validate_backup_id(id: &str) -> anyhow::Result<()> {
    if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
        anyhow::bail!("invalid backup id {:?}", id);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileConfigDeployer {
    backup_root: PathBuf,
}

impl FileConfigDeployer {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Copy `target` into a fresh backup directory.
    async fn backup(&self, target: &Path) -> anyhow::Result<(String, PathBuf)> {
        let bytes = tokio::fs::read(target).await?;
        let now = Utc::now();
        let id = new_backup_id(now);
        let dir = self.backup_root.join(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        tokio::fs::write(dir.join(&file_name), &bytes).await?;

        let manifest = BackupManifest {
            id: id.clone(),
            original: target.to_path_buf(),
            file_name,
            sha256: sha256_hex(&bytes),
            created_at: now,
        };
        tokio::fs::write(dir.join(MANIFEST), serde_json::to_vec_pretty(&manifest)?).await?;
        debug!(backup_id = %id, target = %target.display(), "backup written");
        Ok((id, dir))
    }

    async fn read_manifest(&self, id: &str) -> anyhow::Result<BackupManifest> {
        let path = self.backup_root.join(id).join(MANIFEST);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("backup {} unreadable: {}", id, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write through a sibling temp file so readers never see a partial file.
async fn write_atomic(target: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".rigup-tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

#[async_trait]
impl ConfigDeployer for FileConfigDeployer {
    async fn deploy_with_backup(
        &self,
        spec: &ConfigFileSpec,
        vars: &HashMap<String, String>,
    ) -> anyhow::Result<DeployResult> {
        let rendered = render(&spec.template, vars)?;

        let mut result = DeployResult {
            success: false,
            target: spec.target.clone(),
            backup_id: None,
            backup_path: None,
            backup_error: None,
        };

        if tokio::fs::try_exists(&spec.target).await.unwrap_or(false) {
            match self.backup(&spec.target).await {
                Ok((id, path)) => {
                    result.backup_id = Some(id);
                    result.backup_path = Some(path);
                }
                Err(e) => {
                    warn!(target = %spec.target.display(), error = %e, "backup failed, deploying anyway");
                    result.backup_error = Some(e.to_string());
                }
            }
        }

        write_atomic(&spec.target, rendered.as_bytes()).await?;
        info!(config = %spec.name, target = %spec.target.display(), "configuration deployed");
        result.success = true;
        Ok(result)
    }

    async fn restore(&self, backup_id: &str) -> anyhow::Result<PathBuf> {
        validate_backup_id(backup_id)?;
        let manifest = self.read_manifest(backup_id).await?;
        let bytes = tokio::fs::read(self.backup_root.join(backup_id).join(&manifest.file_name)).await?;

        let actual = sha256_hex(&bytes);
        if actual != manifest.sha256 {
            anyhow::bail!(
                "backup {} is corrupt: checksum {} does not match {}",
                backup_id,
                actual,
                manifest.sha256
            );
        }

        write_atomic(&manifest.original, &bytes).await?;
        info!(backup_id, target = %manifest.original.display(), "backup restored");
        Ok(manifest.original)
    }

    async fn list_backups(&self) -> anyhow::Result<Vec<BackupInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.backup_root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.read_manifest(&id).await {
                Ok(m) => backups.push(BackupInfo {
                    id: m.id,
                    created_at: m.created_at,
                    path: entry.path(),
                    original: m.original,
                }),
                Err(e) => warn!(backup_id = %id, error = %e, "skipping invalid backup"),
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    async fn remove_backup(&self, backup_id: &str) -> anyhow::Result<()> {
        validate_backup_id(backup_id)?;
        tokio::fs::remove_dir_all(self.backup_root.join(backup_id)).await?;
        debug!(backup_id, "backup removed");
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_deployed(&self, path: &Path) -> anyhow::Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[async_trait]
impl BackupStore for FileConfigDeployer {
    async fn list(&self) -> anyhow::Result<Vec<BackupInfo>> {
        self.list_backups().await
    }

    async fn remove(&self, backup_id: &str) -> anyhow::Result<()> {
        self.remove_backup(backup_id).await
    }
}
