//! Scratch repositories for tests, driven through the real `git` binary.

use std::path::Path;

use anyhow::Context;
use gix::ObjectId;
use tempfile::TempDir;

use crate::git::GitProcess;

/// Run one git command in `dir`, returning stdout.
pub(crate) async fn git(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let out = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await?;
    anyhow::ensure!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(String::from_utf8(out.stdout)?)
}

/// A fresh repository on branch `master` with a configured identity.
pub(crate) async fn scratch_repo() -> anyhow::Result<(TempDir, GitProcess)> {
    let dir = TempDir::new()?;
    git(dir.path(), &["init", "-q"]).await?;
    git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/master"]).await?;
    git(dir.path(), &["config", "user.name", "tester"]).await?;
    git(dir.path(), &["config", "user.email", "tester@localhost"]).await?;
    let process = GitProcess::in_dir(dir.path());
    Ok((dir, process))
}

/// Write `content` to `file`, commit it, and return the commit id.
pub(crate) async fn commit_file(
    dir: &Path,
    file: &str,
    content: &str,
    message: &str,
) -> anyhow::Result<ObjectId> {
    tokio::fs::write(dir.join(file), content).await?;
    git(dir, &["add", file]).await?;
    git(dir, &["commit", "-q", "-m", message]).await?;
    let hex = git(dir, &["rev-parse", "HEAD"]).await?;
    ObjectId::from_hex(hex.trim().as_bytes()).context("unparsable commit id")
}
