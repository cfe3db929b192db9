//! Forget a stored login.

use config::{Credentials, DEFAULT_LOGIN};

/// Arguments for the `logout` subcommand.
#[derive(clap::Args)]
pub(crate) struct Args {
    /// The login to forget.
    #[arg(default_value = DEFAULT_LOGIN)]
    name: String,
}

pub(crate) fn run(args: Args) -> anyhow::Result<()> {
    let mut creds = Credentials::load()?;
    if creds.remove(&args.name) {
        creds.save()?;
        tracing::info!(login = args.name, "token removed");
    } else {
        tracing::warn!(login = args.name, "no such login");
    }
    Ok(())
}
