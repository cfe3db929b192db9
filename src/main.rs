//! The entry point for the Dropbox remote helper and its companion tool.

#![warn(missing_docs)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use git_remote_dropbox::cli::{self, HelperArgs, ManageArgs};

/// The binary name Git discovers for `dropbox://` remotes.
const HELPER: &str = "git-remote-dropbox";

/// The companion tool's binary name.
const MANAGE: &str = "git-dropbox-manage";

//================================================================================================
// Functions
//================================================================================================

fn main() -> ExitCode {
    let arg0 = std::env::args_os().next().unwrap_or(OsString::from(HELPER));
    match PathBuf::from(arg0).file_stem().and_then(|p| p.to_str()) {
        Some(MANAGE) => manage(),
        _ => helper(),
    }
}

/// The remote helper personality, invoked by Git as
/// `git-remote-dropbox <remote> <url>`.
#[tokio::main]
async fn helper() -> ExitCode {
    let args = HelperArgs::parse();
    let _guard = cli::init_global_subscriber(args.log);

    if let Err(e) = cli::run_helper(args).await {
        git_remote_dropbox::fatal!(e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// The management personality, `git-dropbox-manage <command>`.
#[tokio::main]
async fn manage() -> ExitCode {
    let args = ManageArgs::parse();
    let _guard = cli::init_global_subscriber(args.log);

    if let Err(e) = cli::commands::run(args).await {
        git_remote_dropbox::fatal!(e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
