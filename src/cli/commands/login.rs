//! Store an access token for a login.

use std::io::{BufRead, Write};

use anyhow::Context;
use config::{Credentials, DEFAULT_LOGIN};

/// Arguments for the `login` subcommand.
#[derive(clap::Args)]
pub(crate) struct Args {
    /// The login to store the token under.
    #[arg(default_value = DEFAULT_LOGIN)]
    name: String,
}

pub(crate) fn run(args: Args) -> anyhow::Result<()> {
    let mut creds = Credentials::load()?;

    eprint!("Access token for `{}`: ", args.name);
    std::io::stderr().flush()?;
    let mut token = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut token)
        .context("could not read a token")?;
    let token = token.trim();
    anyhow::ensure!(!token.is_empty(), "no token given");

    creds.set(args.name.as_str(), token);
    creds.save()?;
    tracing::info!(
        login = args.name,
        path = %creds.path().display(),
        "token stored"
    );
    Ok(())
}
