//! Change the default branch of a remote repository.

use std::sync::Arc;

use anyhow::Context;
use remote::git::GitProcess;
use remote::refs::RefStore;
use remote::{DropboxStore, RemoteUrl};

use crate::cli::resolve_token;

/// Arguments for the `set-head` subcommand.
#[derive(clap::Args)]
pub(crate) struct Args {
    /// The remote to change: a configured remote name or a `dropbox://` URL.
    remote: String,

    /// The branch HEAD should point at; it must already exist on the remote.
    branch: String,
}

pub(crate) async fn run(args: Args) -> anyhow::Result<()> {
    let url = resolve_url(&args.remote).await?;
    let token = resolve_token(&url)?;
    let store = Arc::new(DropboxStore::new(token)?);

    RefStore::new(store, url.root())
        .set_head(&args.branch)
        .await?;
    tracing::info!(remote = %url, branch = args.branch, "default branch updated");
    Ok(())
}

/// Accept either a literal URL or the name of a configured remote.
async fn resolve_url(remote: &str) -> anyhow::Result<RemoteUrl> {
    if let Ok(url) = remote.parse() {
        return Ok(url);
    }
    let configured = GitProcess::new()
        .remote_url(remote)
        .await
        .with_context(|| format!("no remote named `{remote}`"))?;
    configured
        .parse()
        .with_context(|| format!("remote `{remote}` is not a dropbox:// remote"))
}
