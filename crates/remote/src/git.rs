//! # Local Git Access
//!
//! All reads and writes of the local repository go through the `git` binary.
//! The helper inherits its environment from Git, so `GIT_DIR` and friends are
//! honored without any handling here; tests pin a repository explicitly via
//! [`GitProcess::in_dir`].
//!
//! Object writes are content-addressed and therefore idempotent, which is
//! what makes the concurrent transfer workers safe to interleave.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use gix::ObjectId;
use gix::objs::Kind;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use thiserror::Error as ThisError;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while driving the `git` binary.
///
/// Any of these is fatal for the helper session: either the local repository
/// is unusable or an object failed to parse.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The command ran and failed.
    #[error("`{command}` failed ({status}): {stderr}")]
    Exit {
        /// The command line that failed.
        command: String,
        /// Its exit status.
        status: i32,
        /// Whatever it printed to stderr.
        stderr: String,
    },
    /// A transparent wrapper for a [`gix::hash::decode::Error`]
    #[error(transparent)]
    Hex(#[from] gix::hash::decode::Error),
    /// A transparent wrapper for a [`std::io::Error`]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The object type reported by `cat-file` is not one git defines.
    #[error(transparent)]
    Kind(#[from] gix::objs::kind::Error),
    /// Output that should have been UTF-8 was not.
    #[error("unreadable output from `{0}`")]
    Output(String),
}

/// A handle for spawning `git` subprocesses.
#[derive(Clone, Debug, Default)]
pub struct GitProcess {
    dir: Option<PathBuf>,
}

//================================================================================================
// Impls
//================================================================================================

impl GitProcess {
    /// Operate on whatever repository the inherited environment selects.
    pub fn new() -> Self {
        GitProcess::default()
    }

    /// Operate on the repository at `dir`, via `git -C`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        GitProcess {
            dir: Some(dir.into()),
        }
    }

    /// Every object reachable from `include` but not from any of `exclude`.
    ///
    /// The boundary set goes to `rev-list` over stdin so arbitrarily many
    /// refs never overflow the argument list.
    pub async fn rev_list_missing(
        &self,
        include: &[ObjectId],
        exclude: &[ObjectId],
    ) -> Result<Vec<ObjectId>, Error> {
        if include.is_empty() {
            return Ok(Vec::new());
        }
        let mut stdin = String::new();
        for id in include {
            stdin.push_str(&id.to_string());
            stdin.push('\n');
        }
        for id in exclude {
            stdin.push('^');
            stdin.push_str(&id.to_string());
            stdin.push('\n');
        }

        let out = self
            .run(&["rev-list", "--objects", "--stdin"], Some(stdin.as_bytes()))
            .await?;
        let text = text(out, "rev-list")?;

        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for line in text.lines() {
            // Each line is `<hash>` optionally followed by a path hint.
            let Some(hex) = line.split_whitespace().next() else {
                continue;
            };
            let id = ObjectId::from_hex(hex.as_bytes())?;
            if seen.insert(id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Read an object's kind and raw payload.
    pub async fn cat_object(&self, id: &ObjectId) -> Result<(Kind, Vec<u8>), Error> {
        let kind = self.object_kind(id).await?;
        let kind_str = kind.to_string();
        let hex = id.to_string();
        let out = self.run(&["cat-file", &kind_str, &hex], None).await?;
        Ok((kind, out))
    }

    /// The object's type according to `cat-file -t`.
    pub async fn object_kind(&self, id: &ObjectId) -> Result<Kind, Error> {
        let hex = id.to_string();
        let out = self.run(&["cat-file", "-t", &hex], None).await?;
        let name = text(out, "cat-file -t")?;
        Ok(Kind::from_bytes(name.trim().as_bytes())?)
    }

    /// Install a raw object payload into the repository, returning its hash.
    pub async fn write_object(&self, kind: Kind, data: &[u8]) -> Result<ObjectId, Error> {
        let kind_str = kind.to_string();
        let out = self
            .run(&["hash-object", "-w", "-t", &kind_str, "--stdin"], Some(data))
            .await?;
        let hex = text(out, "hash-object")?;
        Ok(ObjectId::from_hex(hex.trim().as_bytes())?)
    }

    /// Whether the object is present (or synthesizable, like the empty tree).
    pub async fn object_exists(&self, id: &ObjectId) -> Result<bool, Error> {
        let hex = id.to_string();
        self.succeeds(&["cat-file", "-e", &hex]).await
    }

    /// Whether the full object graph behind a commit is present locally.
    pub async fn history_exists(&self, id: &ObjectId) -> Result<bool, Error> {
        let hex = id.to_string();
        self.succeeds(&["rev-list", "--objects", "--quiet", &hex])
            .await
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    pub async fn is_ancestor(
        &self,
        ancestor: &ObjectId,
        descendant: &ObjectId,
    ) -> Result<bool, Error> {
        let a = ancestor.to_string();
        let b = descendant.to_string();
        let out = self
            .output(&["merge-base", "--is-ancestor", &a, &b], None)
            .await?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(exit_error(&["merge-base", "--is-ancestor", &a, &b], &out)),
        }
    }

    /// Resolve an arbitrary revision expression, if it names anything.
    pub async fn rev_parse(&self, spec: &str) -> Result<Option<ObjectId>, Error> {
        let out = self
            .output(&["rev-parse", "--verify", "--quiet", spec], None)
            .await?;
        if !out.status.success() {
            return Ok(None);
        }
        let hex = text(out.stdout, "rev-parse")?;
        Ok(Some(ObjectId::from_hex(hex.trim().as_bytes())?))
    }

    /// Every ref present in the local repository.
    pub async fn local_refs(&self) -> Result<BTreeMap<String, ObjectId>, Error> {
        let out = self
            .run(&["for-each-ref", "--format=%(objectname) %(refname)"], None)
            .await?;
        let listing = text(out, "for-each-ref")?;
        let mut refs = BTreeMap::new();
        for line in listing.lines() {
            if let Some((hex, name)) = line.split_once(' ') {
                refs.insert(name.to_owned(), ObjectId::from_hex(hex.as_bytes())?);
            }
        }
        Ok(refs)
    }

    /// Resolve one level of a symbolic ref, `None` if it is not symbolic.
    pub async fn symbolic_ref(&self, name: &str) -> Result<Option<String>, Error> {
        let out = self.output(&["symbolic-ref", "--quiet", name], None).await?;
        if !out.status.success() {
            return Ok(None);
        }
        let target = text(out.stdout, "symbolic-ref")?;
        Ok(Some(target.trim().to_owned()))
    }

    /// The configured URL of a named remote.
    pub async fn remote_url(&self, remote: &str) -> Result<String, Error> {
        let out = self.run(&["remote", "get-url", remote], None).await?;
        Ok(text(out, "remote get-url")?.trim().to_owned())
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>, Error> {
        let out = self.output(args, stdin).await?;
        if !out.status.success() {
            return Err(exit_error(args, &out));
        }
        Ok(out.stdout)
    }

    async fn succeeds(&self, args: &[&str]) -> Result<bool, Error> {
        let out = self.output(args, None).await?;
        Ok(out.status.success())
    }

    async fn output(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, Error> {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pipe = child.stdin.take();
        let feed = async {
            if let (Some(mut pipe), Some(data)) = (pipe, stdin) {
                pipe.write_all(data).await?;
                pipe.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out, fed) = tokio::join!(child.wait_with_output(), feed);
        fed?;
        Ok(out?)
    }
}

//================================================================================================
// Functions
//================================================================================================

fn exit_error(args: &[&str], out: &Output) -> Error {
    Error::Exit {
        command: format!("git {}", args.join(" ")),
        status: out.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
    }
}

fn text(out: Vec<u8>, what: &str) -> Result<String, Error> {
    String::from_utf8(out).map_err(|_| Error::Output(what.to_owned()))
}
