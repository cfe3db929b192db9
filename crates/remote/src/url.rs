//! # Remote URL Format
//!
//! Parsing for the `dropbox://` remote URLs Git hands the helper.
//!
//! ## URL Format
//!
//! ```text
//! dropbox://[[user][:token]@]/absolute/path
//! ```
//!
//! The optional userinfo selects the credential used for the session: a bare
//! name picks that login from the credentials file, a `:token` carries the
//! bearer token inline, and no userinfo falls back to the default login. The
//! path is the repository root inside the account, normalized to a POSIX
//! absolute path with no trailing slash.
//!
//! ```rust
//! use remote::url::{RemoteUrl, TokenSelector};
//!
//! let url: RemoteUrl = "dropbox://work@/team/project.git".parse().unwrap();
//! assert_eq!(url.root(), "/team/project.git");
//! assert!(matches!(url.selector(), TokenSelector::Named(_)));
//! ```

use std::fmt::Display;
use std::str::FromStr;

use nom::IResult;
use nom::bytes::complete::{tag, take_until};
use nom::combinator::{map, opt, verify};
use nom::sequence::tuple;
use thiserror::Error as ThisError;

#[cfg(test)]
mod tests;

const SCHEME: &str = "dropbox://";

//================================================================================================
// Types
//================================================================================================

/// An error encountered while decoding a remote URL.
///
/// All of these are terminal: Git passed us an address we cannot serve.
#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum Error {
    /// The path component may not contain `.` or `..` segments.
    #[error("unsupported path segment `{1}` in `{0}`")]
    DottedPath(String, String),
    /// The repository path must be absolute.
    #[error("repository path must be absolute in `{0}`")]
    RelativePath(String),
    /// The URL does not start with the scheme this helper serves.
    #[error("expected a `{SCHEME}` URL, got `{0}`")]
    Scheme(String),
}

/// The parsed components of a remote URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteUrl {
    selector: TokenSelector,
    root: String,
}

/// Which credential the session should authenticate with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenSelector {
    /// The default login from the credentials file.
    Default,
    /// A named login from the credentials file.
    Named(String),
    /// A bearer token carried inline in the URL.
    Inline(String),
}

/// Borrowed URL pieces, rendered into [`RemoteUrl`] after parsing.
#[derive(Debug, Default, PartialEq, Eq)]
struct UrlRef<'a> {
    user: Option<&'a str>,
    token: Option<&'a str>,
    path: &'a str,
}

//================================================================================================
// Impls
//================================================================================================

impl RemoteUrl {
    /// The repository root inside the account, absolute and without a
    /// trailing slash. Empty means the account root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The credential selector parsed from the userinfo component.
    pub fn selector(&self) -> &TokenSelector {
        &self.selector
    }
}

impl Display for RemoteUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.selector {
            TokenSelector::Default => write!(f, "{SCHEME}{}", self.root),
            TokenSelector::Named(user) => write!(f, "{SCHEME}{user}@{}", self.root),
            // Never echo the token itself.
            TokenSelector::Inline(_) => write!(f, "{SCHEME}:<token>@{}", self.root),
        }
    }
}

impl FromStr for RemoteUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let r = UrlRef::parse(s)?;

        let selector = match (r.user, r.token) {
            (_, Some(token)) => TokenSelector::Inline(token.to_owned()),
            (Some(user), None) => TokenSelector::Named(user.to_owned()),
            (None, None) => TokenSelector::Default,
        };

        let root = normalize(s, r.path)?;

        tracing::trace!(user = r.user, token = r.token.map(|_| "<redacted>"), %root);

        Ok(RemoteUrl { selector, root })
    }
}

impl TryFrom<&str> for RemoteUrl {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl<'a> UrlRef<'a> {
    fn parse(input: &'a str) -> Result<Self, Error> {
        let (rest, _) = scheme(input).map_err(|_| Error::Scheme(input.to_owned()))?;
        let (path, userinfo) = match split_user(rest) {
            Ok(parsed) => parsed,
            Err(_) => (rest, None),
        };

        let (user, token) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, token)) => (not_empty(user), not_empty(token)),
                None => (not_empty(info), None),
            },
            None => (None, None),
        };

        Ok(UrlRef { user, token, path })
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Reduce a raw path to canonical POSIX form: absolute, deduplicated
/// separators, no trailing slash.
fn normalize(url: &str, path: &str) -> Result<String, Error> {
    if !path.starts_with('/') {
        return Err(Error::RelativePath(url.to_owned()));
    }
    let mut root = String::with_capacity(path.len());
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(Error::DottedPath(url.to_owned(), segment.to_owned()));
        }
        root.push('/');
        root.push_str(segment);
    }
    Ok(root)
}

fn not_empty(input: &str) -> Option<&str> {
    if input.is_empty() { None } else { Some(input) }
}

fn scheme(input: &str) -> IResult<&str, &str> {
    tag(SCHEME)(input)
}

/// Split the userinfo off the front, if an `@` delimits one before the path.
fn split_user(input: &str) -> IResult<&str, Option<&str>> {
    opt(map(
        tuple((
            verify(take_until("@"), |info: &str| !info.contains('/')),
            tag("@"),
        )),
        |(info, _)| info,
    ))(input)
}
