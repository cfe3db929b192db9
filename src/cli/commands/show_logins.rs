//! List the stored login names.

use config::Credentials;

pub(crate) fn run() -> anyhow::Result<()> {
    let creds = Credentials::load()?;
    let mut any = false;
    for login in creds.logins() {
        println!("{login}");
        any = true;
    }
    if !any {
        tracing::info!("no stored logins; run `git-dropbox-manage login`");
    }
    Ok(())
}
