//! This module defines the subcommands of `git-dropbox-manage`.
//!
//! Each subcommand lives in its own module with its own arguments; `run`
//! dispatches after parsing.

use clap::Subcommand;

use super::ManageArgs;

mod login;
mod logout;
mod set_head;
mod show_logins;

//================================================================================================
// Types
//================================================================================================

/// The subcommands of the management tool.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Store an access token for a login.
    ///
    /// The token is read from the terminal and written to the credentials
    /// file with owner-only permissions. Without a name, the default login
    /// is set.
    Login(login::Args),
    /// Forget a stored login.
    Logout(logout::Args),
    /// Change the default branch of a remote repository.
    ///
    /// The switch is a compare-and-swap against the current HEAD file, so
    /// two concurrent switches cannot silently overwrite one another.
    SetHead(set_head::Args),
    /// List the stored login names.
    ShowLogins,
    /// Print the version and exit.
    Version,
}

//================================================================================================
// Functions
//================================================================================================

/// The main entry point of the management tool.
pub async fn run(args: ManageArgs) -> anyhow::Result<()> {
    match args.command {
        Commands::Login(args) => login::run(args),
        Commands::Logout(args) => logout::run(args),
        Commands::SetHead(args) => set_head::run(args).await,
        Commands::ShowLogins => show_logins::run(),
        Commands::Version => {
            println!("git-remote-dropbox {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        },
    }
}
