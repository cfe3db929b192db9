//! # Remote Helper Engine
//!
//! Speaks the Git remote-helper protocol over a line stream: read a command,
//! answer with a block terminated by a blank line, repeat until Git closes
//! the stream. The engine itself is single-threaded; all parallelism lives
//! in the [`Transfer`] pool it drives.
//!
//! Push keeps Git's atomicity story on a dumb file store by ordering: the
//! whole missing closure is uploaded and drained first, then the ref is
//! flipped with a compare-and-swap against the revision observed when the
//! push was planned. A failed CAS is reported as `fetch first` and never
//! retried. Errors scoped to a single push request become `error <dst> ...`
//! lines; everything else tears the session down.

use std::collections::HashSet;
use std::sync::Arc;

use gix::ObjectId;
use thiserror::Error as ThisError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::git::{self, GitProcess};
use crate::refs::{Expect, HEAD, RefStore};
use crate::store::{self, BlobStore};
use crate::transfer::{self, Transfer};


const CAPABILITIES: &str = "option\npush\nfetch\n\n";

//================================================================================================
// Types
//================================================================================================

/// An error that terminates the helper session.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A transparent wrapper for a [`git::Error`]
    #[error(transparent)]
    Git(#[from] git::Error),
    /// A transparent wrapper for a [`std::io::Error`]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Malformed input from Git.
    #[error("unexpected input from git: `{0}`")]
    Protocol(String),
    /// A transparent wrapper for a [`crate::refs::Error`]
    #[error(transparent)]
    Refs(#[from] crate::refs::Error),
    /// A transparent wrapper for a [`store::Error`]
    #[error(transparent)]
    Store(#[from] store::Error),
    /// A transparent wrapper for a [`transfer::Error`]
    #[error(transparent)]
    Transfer(#[from] transfer::Error),
}

/// The remote-helper protocol engine for one session.
pub struct Helper {
    git: GitProcess,
    refs: RefStore,
    transfer: Transfer,
    options: Options,
}

/// Settings Git hands over through `option` commands.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// 0 silences status lines, higher values add detail.
    pub verbosity: u8,
    /// Whether Git asked for progress reporting.
    pub progress: bool,
    /// Set when the session serves an initial clone.
    pub cloning: bool,
}

/// One `fetch <hash> <name>` request.
struct FetchSpec {
    id: ObjectId,
    name: String,
}

/// One `push [+]<src>:<dst>` request.
struct PushSpec {
    force: bool,
    src: String,
    dst: String,
}

/// How a single push request failed.
enum PushError {
    /// Reported as `error <dst> <reason>`; the session continues.
    Reject(String),
    /// Terminates the session.
    Fatal(Error),
}

//================================================================================================
// Impls
//================================================================================================

impl Default for Options {
    fn default() -> Self {
        Options {
            verbosity: 1,
            progress: true,
            cloning: false,
        }
    }
}

impl Helper {
    /// An engine for the repository at `root` inside `store`, moving objects
    /// with `jobs` workers.
    pub fn new(store: Arc<dyn BlobStore>, git: GitProcess, root: &str, jobs: usize) -> Self {
        Helper {
            refs: RefStore::new(store.clone(), root),
            transfer: Transfer::new(store, git.clone(), root, jobs),
            git,
            options: Options::default(),
        }
    }

    /// Drive the session until Git closes the command stream.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_owned();
            let (command, arg) = match line.split_once(' ') {
                Some((command, arg)) => (command, Some(arg.trim())),
                None => (line.as_str(), None),
            };

            match command {
                "" => continue,
                "capabilities" => send(&mut output, CAPABILITIES).await?,
                "option" => {
                    let reply = self.set_option(arg.unwrap_or(""));
                    send(&mut output, reply).await?;
                },
                "list" => self.list(&mut output).await?,
                "push" => {
                    let arg = arg.ok_or_else(|| Error::Protocol(line.clone()))?;
                    let mut specs = vec![parse_push(arg)?];
                    while let Some(next) = lines.next_line().await? {
                        let next = next.trim();
                        if next.is_empty() {
                            break;
                        }
                        let rest = next
                            .strip_prefix("push ")
                            .ok_or_else(|| Error::Protocol(next.to_owned()))?;
                        specs.push(parse_push(rest.trim())?);
                    }
                    self.push_batch(&specs, &mut output).await?;
                },
                "fetch" => {
                    let arg = arg.ok_or_else(|| Error::Protocol(line.clone()))?;
                    let mut specs = vec![parse_fetch(arg)?];
                    while let Some(next) = lines.next_line().await? {
                        let next = next.trim();
                        if next.is_empty() {
                            break;
                        }
                        let rest = next
                            .strip_prefix("fetch ")
                            .ok_or_else(|| Error::Protocol(next.to_owned()))?;
                        specs.push(parse_fetch(rest.trim())?);
                    }
                    self.fetch_batch(&specs, &mut output).await?;
                },
                _ => return Err(Error::Protocol(line.clone())),
            }
        }
        Ok(())
    }

    fn set_option(&mut self, arg: &str) -> &'static str {
        let (name, value) = match arg.split_once(' ') {
            Some((name, value)) => (name, value.trim()),
            None => (arg, ""),
        };
        match name {
            "verbosity" => match value.parse() {
                Ok(level) => {
                    self.options.verbosity = level;
                    "ok\n"
                },
                Err(_) => "unsupported\n",
            },
            "progress" => {
                self.options.progress = value == "true";
                "ok\n"
            },
            "cloning" => {
                self.options.cloning = value == "true";
                "ok\n"
            },
            _ => "unsupported\n",
        }
    }

    /// Answer `list` / `list for-push`: every ref, then the default branch.
    async fn list<W>(&self, output: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let refs = self.refs.list_refs().await?;
        let mut block = String::new();
        for (name, r) in &refs {
            block.push_str(&format!("{} {name}\n", r.id));
        }
        if let Some((target, _)) = self.refs.get_symbolic(HEAD).await? {
            block.push_str(&format!("@{target} {HEAD}\n"));
        }
        block.push('\n');
        send(output, &block).await
    }

    async fn push_batch<W>(&mut self, specs: &[PushSpec], output: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let head_missing = self.refs.get_symbolic(HEAD).await?.is_none();
        let mut pushed_branches = Vec::new();
        let mut block = String::new();

        for spec in specs {
            match self.push_one(spec).await {
                Ok(()) => {
                    block.push_str(&format!("ok {}\n", spec.dst));
                    if !spec.src.is_empty() && spec.dst.starts_with("refs/heads/") {
                        pushed_branches.push(spec.dst.clone());
                    }
                },
                Err(PushError::Reject(reason)) => {
                    tracing::warn!(dst = spec.dst, reason, "push rejected");
                    let reason = reason.replace('\n', " ");
                    block.push_str(&format!("error {} {reason}\n", spec.dst));
                },
                Err(PushError::Fatal(e)) => return Err(e),
            }
        }

        // First branch ever pushed: pin the default branch. A concurrent
        // bootstrap winning the race is fine, the ref landed either way.
        if head_missing && !pushed_branches.is_empty() {
            self.bootstrap(&pushed_branches).await?;
        }

        block.push('\n');
        send(output, &block).await
    }

    /// One push request, start to finish: plan, upload, swing the ref.
    async fn push_one(&self, spec: &PushSpec) -> Result<(), PushError> {
        // Fresh server state for every request; stale snapshots would only
        // widen the CAS window.
        let remote_refs = self.refs.list_refs().await.map_err(demote_refs)?;
        let existing = remote_refs.get(&spec.dst);

        if spec.src.is_empty() {
            let existing = existing
                .ok_or_else(|| PushError::Reject(format!("no such ref {}", spec.dst)))?;
            return self
                .refs
                .delete_ref(&spec.dst, &existing.rev)
                .await
                .map_err(demote_refs);
        }

        let local = self.git.local_refs().await.map_err(fatal)?;
        let new = match local.get(&spec.src) {
            Some(id) => *id,
            None => self
                .git
                .rev_parse(&spec.src)
                .await
                .map_err(fatal)?
                .ok_or_else(|| PushError::Reject(format!("unknown local ref {}", spec.src)))?,
        };

        if let Some(existing) = existing {
            if existing.id == new {
                // Pushing what the remote already has: nothing to do.
                return Ok(());
            }
            if !spec.force {
                if !self.git.object_exists(&existing.id).await.map_err(fatal)? {
                    return Err(PushError::Reject("fetch first".into()));
                }
                if !self
                    .git
                    .is_ancestor(&existing.id, &new)
                    .await
                    .map_err(fatal)?
                {
                    return Err(PushError::Reject("non-fast-forward".into()));
                }
            }
        }

        // The store is closed under reachability, so any server ref we also
        // hold locally bounds the upload set.
        let mut exclude = Vec::new();
        for r in remote_refs.values() {
            if self.git.object_exists(&r.id).await.map_err(fatal)? {
                exclude.push(r.id);
            }
        }
        let missing = self
            .git
            .rev_list_missing(&[new], &exclude)
            .await
            .map_err(fatal)?;
        if self.options.progress && !missing.is_empty() {
            tracing::info!(objects = missing.len(), dst = spec.dst, "uploading");
        }
        let uploaded = self
            .transfer
            .upload_missing(&missing)
            .await
            .map_err(demote_transfer)?;
        if self.options.verbosity > 1 {
            tracing::debug!(uploaded, dst = spec.dst, "transfer complete");
        }

        // Only now, with the closure durably present, does the ref move.
        let expect = match existing {
            Some(r) => Expect::Rev(r.rev.clone()),
            None => Expect::Absent,
        };
        self.refs
            .update_ref(&spec.dst, &new, expect)
            .await
            .map_err(demote_refs)?;
        Ok(())
    }

    async fn fetch_batch<W>(&self, specs: &[FetchSpec], output: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let mut seen = HashSet::new();
        let mut roots = Vec::new();
        for spec in specs {
            tracing::trace!(name = spec.name, id = %spec.id, "fetch requested");
            if seen.insert(spec.id) {
                roots.push(spec.id);
            }
        }
        if self.options.cloning {
            tracing::debug!(roots = roots.len(), "fetching into a fresh clone");
        }
        let installed = self.transfer.download_closure(roots).await?;
        if self.options.progress && installed > 0 {
            tracing::info!(objects = installed, "fetched");
        }
        send(output, "\n").await
    }

    /// Create `HEAD` on first contact, preferring the branch the local
    /// repository considers current.
    async fn bootstrap(&self, branches: &[String]) -> Result<(), Error> {
        let preferred = self.git.symbolic_ref(HEAD).await?;
        let target = preferred
            .filter(|t| branches.contains(t))
            .unwrap_or_else(|| branches[0].clone());
        if self.refs.bootstrap_head(&target).await? {
            tracing::debug!(target, "created HEAD");
        } else {
            tracing::debug!("HEAD was created concurrently");
        }
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Push-scoped demotion of ref errors: conflicts and protections are
/// per-request rejections, infrastructure failures stay fatal.
fn demote_refs(e: crate::refs::Error) -> PushError {
    use crate::refs::Error as E;
    match e {
        E::Conflict(_) => PushError::Reject("fetch first".into()),
        E::HeadProtected(_) => PushError::Reject("cannot delete the current branch".into()),
        E::NoSuchRef(name) => PushError::Reject(format!("no such ref {name}")),
        E::Store(store::Error::Transient(msg)) => {
            PushError::Reject(format!("temporary store failure: {msg}"))
        },
        E::Store(other) => PushError::Fatal(other.into()),
    }
}

fn demote_transfer(e: transfer::Error) -> PushError {
    match e {
        transfer::Error::Store(store::Error::Transient(msg)) => {
            PushError::Reject(format!("transfer failed: {msg}"))
        },
        other => PushError::Fatal(other.into()),
    }
}

fn fatal(e: git::Error) -> PushError {
    PushError::Fatal(e.into())
}

fn parse_fetch(arg: &str) -> Result<FetchSpec, Error> {
    let (hex, name) = arg
        .split_once(' ')
        .ok_or_else(|| Error::Protocol(format!("fetch {arg}")))?;
    let id = ObjectId::from_hex(hex.as_bytes())
        .map_err(|_| Error::Protocol(format!("fetch {arg}")))?;
    Ok(FetchSpec {
        id,
        name: name.trim().to_owned(),
    })
}

fn parse_push(arg: &str) -> Result<PushSpec, Error> {
    let (force, spec) = match arg.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, arg),
    };
    let (src, dst) = spec
        .split_once(':')
        .ok_or_else(|| Error::Protocol(format!("push {arg}")))?;
    if dst.is_empty() {
        return Err(Error::Protocol(format!("push {arg}")));
    }
    Ok(PushSpec {
        force,
        src: src.to_owned(),
        dst: dst.to_owned(),
    })
}

async fn send<W>(output: &mut W, text: &str) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
