//! Cloning a single branch into a scratch directory.
//!
//! git2 is synchronous, so the clone runs on tokio's blocking pool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::build::RepoBuilder;
use git2::{Cred, FetchOptions, RemoteCallbacks};

/// Username GitHub accepts alongside a token for HTTPS git operations.
const TOKEN_USERNAME: &str = "x-access-token";

/// Clone `branch` of `clone_url` into `dest` and return the checkout path.
///
/// `dest` must not exist or must be an empty directory.
pub async fn checkout_branch(
    clone_url: &str,
    token: &str,
    branch: &str,
    dest: &Path,
) -> Result<PathBuf> {
    let clone_url = clone_url.to_string();
    let token = token.to_string();
    let branch = branch.to_string();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || clone_blocking(&clone_url, &token, &branch, &dest))
        .await
        .context("Checkout task panicked")?
}

fn clone_blocking(clone_url: &str, token: &str, branch: &str, dest: &Path) -> Result<PathBuf> {
    tracing::debug!(url = %clone_url, branch = %branch, dest = %dest.display(), "Cloning branch");

    let mut callbacks = RemoteCallbacks::new();
    let token = token.to_string();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext(TOKEN_USERNAME, &token)
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    let repo = RepoBuilder::new()
        .branch(branch)
        .fetch_options(fetch_options)
        .clone(clone_url, dest)
        .with_context(|| format!("Failed to clone branch {} of {}", branch, clone_url))?;

    let head = repo
        .head()
        .ok()
        .and_then(|h| h.peel_to_commit().ok())
        .map(|c| c.id().to_string())
        .unwrap_or_default();
    tracing::debug!(head = %head, "Checkout complete");

    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use tempfile::tempdir;

    /// Create a local repository with one commit on `main`.
    fn init_origin(dir: &Path) -> String {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("package.json"), r#"{"name":"demo"}"#).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("frogbot", "frogbot@localhost").unwrap();
        let commit = repo
            .commit(None, &sig, &sig, "initial", &tree, &[])
            .unwrap();
        let commit = repo.find_commit(commit).unwrap();
        repo.branch("main", &commit, true).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        format!("file://{}", dir.display())
    }

    #[tokio::test]
    async fn test_checkout_branch_from_local_origin() {
        let origin = tempdir().unwrap();
        let url = init_origin(origin.path());
        let work = tempdir().unwrap();
        let dest = work.path().join("checkout");

        let path = checkout_branch(&url, "unused", "main", &dest).await.unwrap();
        assert_eq!(path, dest);
        assert!(dest.join("package.json").exists());
    }

    #[tokio::test]
    async fn test_checkout_missing_branch_fails() {
        let origin = tempdir().unwrap();
        let url = init_origin(origin.path());
        let work = tempdir().unwrap();

        let err = checkout_branch(&url, "unused", "does-not-exist", &work.path().join("c"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does-not-exist"));
    }
}
