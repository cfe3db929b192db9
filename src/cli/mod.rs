//! This module contains the command-line surface of both binaries.
//!
//! The helper personality parses the two positionals Git hands every remote
//! helper and then speaks the remote-helper protocol on stdio. The
//! management personality parses subcommands. Both share the logging flags.

use std::sync::Arc;

use clap::Parser;
use remote::url::TokenSelector;
use remote::{DropboxStore, Helper, RemoteUrl};
use tokio::io::BufReader;

pub use self::logging::init_global_subscriber;

pub mod commands;
pub mod logging;

//================================================================================================
// Types
//================================================================================================

/// The arguments Git passes to the remote helper.
#[derive(Parser)]
#[command(name = "git-remote-dropbox", author, version, about, long_about = None)]
pub struct HelperArgs {
    /// The name of the remote, or its URL for anonymous remotes.
    pub remote: String,

    /// The `dropbox://` URL of the repository.
    pub url: String,

    /// How many transfer workers move objects concurrently.
    #[arg(
        long,
        env = "GIT_REMOTE_DROPBOX_JOBS",
        default_value_t = remote::transfer::DEFAULT_JOBS,
        value_name = "N"
    )]
    pub jobs: usize,

    /// Arguments for controlling logging behavior.
    #[command(flatten)]
    pub log: LogArgs,
}

/// The arguments of the management tool.
#[derive(Parser)]
#[command(name = "git-dropbox-manage", author, version, about, long_about = None)]
pub struct ManageArgs {
    /// Arguments for controlling logging behavior.
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub(crate) command: commands::Commands,
}

/// Arguments for controlling logging behavior.
#[derive(Parser, Clone, Copy, Debug)]
#[command(next_help_heading = "Log Options")]
pub struct LogArgs {
    /// Set the level of verbosity.
    ///
    /// This flag can be used multiple times to increase verbosity:
    /// - `-v` for DEBUG level
    /// - `-vv` for TRACE level
    ///
    /// If not specified, defaults to INFO level. The `RUST_LOG` environment
    /// variable takes precedence over this flag.
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase logging verbosity",
    )]
    verbosity: u8,

    /// Suppress verbosity, taking precedence over other flags.
    ///
    /// This flag can be used multiple times to decrease verbosity:
    /// - `-q` for WARN level
    /// - `-qq` for ERROR level
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
    )]
    quiet: u8,
}

//================================================================================================
// Functions
//================================================================================================

/// Run one helper session over stdio, as invoked by Git.
pub async fn run_helper(args: HelperArgs) -> anyhow::Result<()> {
    let url: RemoteUrl = args.url.parse()?;
    let token = resolve_token(&url)?;

    let store = Arc::new(DropboxStore::new(token)?);
    let git = remote::git::GitProcess::new();
    let mut helper = Helper::new(store, git, url.root(), args.jobs.max(1));

    tracing::debug!(remote = args.remote, url = %url, jobs = args.jobs, "session start");
    let input = BufReader::new(tokio::io::stdin());
    helper.run(input, tokio::io::stdout()).await?;
    Ok(())
}

/// Turn a URL's token selector into a bearer token.
pub(crate) fn resolve_token(url: &RemoteUrl) -> anyhow::Result<String> {
    let token = match url.selector() {
        TokenSelector::Inline(token) => token.clone(),
        TokenSelector::Named(login) => {
            let creds = config::Credentials::load()?;
            creds.token(Some(login))?.to_owned()
        },
        TokenSelector::Default => {
            let creds = config::Credentials::load()?;
            creds.token(None)?.to_owned()
        },
    };
    Ok(token)
}
