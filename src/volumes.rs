//! Volume templating (spec.md §6): expands a `{name}` bind-mount source into
//! a materialized config blob fetched from the control plane.
//!
//! Grounded in the teacher's config-file-staging step in
//! `environment/docker/environment.rs` (it wrote egg-rendered config files
//! into a per-server directory before container create); here the source
//! is the control plane's `GET /api/config/:name` blob rather than a local
//! template, and the destination directory is keyed by a fresh UUID per
//! spec.md's `<volumesRoot>/<uuid>/_data/<basename(target)>` layout.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::api::HttpClient;
use crate::error::{AgentError, Result};
use crate::types::container::MountEntry;

/// Matches a bind-mount source written as `{name}` — the literal braces mark
/// it as a config-blob reference rather than a real host path.
fn template_name(source: &str) -> Option<&str> {
    source.strip_prefix('{').and_then(|s| s.strip_suffix('}')).filter(|s| !s.is_empty())
}

/// Resolves every templated mount in `mounts` by fetching its blob and
/// writing it under `volumes_root/<uuid>/_data/<basename(destination)>`,
/// rewriting the mount's `source` to that materialized path. Mounts whose
/// source isn't a `{name}` reference pass through untouched.
pub async fn materialize_mounts(
    client: &HttpClient,
    volumes_root: &Path,
    mounts: Vec<MountEntry>,
) -> Result<Vec<MountEntry>> {
    let mut resolved = Vec::with_capacity(mounts.len());
    for mount in mounts {
        match template_name(&mount.source) {
            Some(name) => {
                let path = materialize_one(client, volumes_root, name, &mount.destination).await?;
                resolved.push(MountEntry {
                    source: path.to_string_lossy().into_owned(),
                    destination: mount.destination,
                    read_only: mount.read_only,
                });
            }
            None => resolved.push(mount),
        }
    }
    Ok(resolved)
}

async fn materialize_one(
    client: &HttpClient,
    volumes_root: &Path,
    name: &str,
    destination: &str,
) -> Result<PathBuf> {
    let content = client
        .get_config_blob(name)
        .await
        .map_err(|e| AgentError::ConfigInvalid(format!("config blob '{name}' fetch failed: {e}")))?;

    let basename = Path::new(destination)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    let id = uuid::Uuid::new_v4();
    let dir = volumes_root.join(id.to_string()).join("_data");
    std::fs::create_dir_all(&dir)
        .map_err(|e| AgentError::Internal(format!("failed to create volume dir: {e}")))?;

    let file_path = dir.join(&basename);
    std::fs::write(&file_path, content)
        .map_err(|e| AgentError::Internal(format!("failed to write config blob: {e}")))?;

    debug!(name, path = %file_path.display(), "materialized config blob for templated mount");
    Ok(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_template_name() {
        assert_eq!(template_name("{app-config}"), Some("app-config"));
        assert_eq!(template_name("/host/real/path"), None);
        assert_eq!(template_name("{}"), None);
    }

    #[tokio::test]
    async fn passthrough_mount_is_untouched() {
        let credentials = crate::credentials::CredentialStore::new();
        let client = HttpClient::new("https://127.0.0.1:1", credentials, std::time::Duration::from_millis(10)).unwrap();
        let tmp = tempfile::tempdir().unwrap();

        let mounts = vec![MountEntry {
            source: "/data/real".into(),
            destination: "/data".into(),
            read_only: false,
        }];
        let resolved = materialize_mounts(&client, tmp.path(), mounts).await.unwrap();
        assert_eq!(resolved[0].source, "/data/real");
    }
}
