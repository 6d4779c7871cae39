//! Weight file resolution: HuggingFace Hub URLs or local paths.
//!
//! Hub downloads go through `hf-hub`'s own cache.

use anyhow::Result;
use hf_hub::api::sync::Api;
use std::path::PathBuf;

/// Fetch `path` if it is an `hf://` URL, otherwise check that it exists locally.
///
/// Accepted forms:
/// - `hf://owner/repo/path/to/file.safetensors`
/// - `hf://owner/repo/path/to/file.safetensors@revision`
/// - `/local/path/file.safetensors`
pub fn download_if_necessary(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("hf://") {
        let (repo_id, filename, revision) = parse_hf_path(stripped)?;
        tracing::info!(repo = %repo_id, file = %filename, "fetching weights from hub");
        let api = Api::new()?;
        let repo = match revision {
            Some(rev) => api.repo(hf_hub::Repo::with_revision(
                repo_id,
                hf_hub::RepoType::Model,
                rev,
            )),
            None => api.repo(hf_hub::Repo::model(repo_id)),
        };
        return Ok(repo.get(&filename)?);
    }

    let local = PathBuf::from(path);
    if !local.exists() {
        anyhow::bail!("No such file or directory: {path}");
    }
    Ok(local)
}

/// Split `owner/repo/path@rev` into repo id, file and optional revision.
fn parse_hf_path(path: &str) -> Result<(String, String, Option<String>)> {
    let mut parts = path.splitn(3, '/');
    let (Some(owner), Some(repo), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("Invalid hf:// path: {path}");
    };
    if owner.is_empty() || repo.is_empty() || rest.is_empty() {
        anyhow::bail!("Invalid hf:// path: {path}");
    }
    let repo_id = format!("{owner}/{repo}");
    match rest.split_once('@') {
        Some((file, rev)) => Ok((repo_id, file.to_string(), Some(rev.to_string()))),
        None => Ok((repo_id, rest.to_string(), None)),
    }
}
