//! # Remote Ref Database
//!
//! Refs live in the store as one tiny file each: `<root>/refs/...` holding a
//! hash plus newline, and `<root>/HEAD` holding `ref: <target>`. Every
//! mutation is a conditional write against the revision tag observed when the
//! decision was made, which is what linearizes concurrent pushers without any
//! server-side logic.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use gix::ObjectId;
use thiserror::Error as ThisError;

use crate::store::retry::with_retry;
use crate::store::{self, BlobStore, Revision};


/// The symbolic ref naming the default branch.
pub const HEAD: &str = "HEAD";

/// Concurrent reads while materializing a ref listing.
const LIST_JOBS: usize = 8;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while reading or mutating remote refs.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The ref changed (or appeared, or vanished) since it was observed.
    #[error("concurrent update of `{0}`")]
    Conflict(String),
    /// The ref is the target of `HEAD` and may not be deleted.
    #[error("`{0}` is the current branch")]
    HeadProtected(String),
    /// The named ref does not exist on the remote.
    #[error("no such ref `{0}`")]
    NoSuchRef(String),
    /// A transparent wrapper for a [`store::Error`]
    #[error(transparent)]
    Store(#[from] store::Error),
}

/// What a ref update expects to find on the store.
#[derive(Clone, Debug)]
pub enum Expect {
    /// The ref must not exist yet.
    Absent,
    /// The ref file must still carry this revision tag.
    Rev(Revision),
    /// Write unconditionally. The helper never takes this path; it exists
    /// for out-of-band repair.
    Force,
}

/// A ref as observed on the store: its value and the revision tag to CAS
/// against.
#[derive(Clone, Debug)]
pub struct RemoteRef {
    /// The object hash the ref points at.
    pub id: ObjectId,
    /// The revision tag of the ref file.
    pub rev: Revision,
}

/// Read and conditionally mutate the refs of one remote repository.
#[derive(Clone)]
pub struct RefStore {
    store: Arc<dyn BlobStore>,
    root: String,
}

//================================================================================================
// Impls
//================================================================================================

impl RefStore {
    /// A ref database rooted at `root` inside `store`.
    pub fn new(store: Arc<dyn BlobStore>, root: impl Into<String>) -> Self {
        RefStore {
            store,
            root: root.into(),
        }
    }

    /// Every direct ref on the remote, keyed by full ref name.
    ///
    /// A fresh repository (no `refs/` folder yet) is an empty map. Files
    /// whose contents are not hash-shaped are ignored with a warning.
    pub async fn list_refs(&self) -> Result<BTreeMap<String, RemoteRef>, Error> {
        let prefix = format!("{}/refs", self.root);
        let entries = match with_retry("list refs", || self.store.list(&prefix)).await {
            Ok(entries) => entries,
            Err(store::Error::NotFound(_)) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let base = format!("{}/", self.root);
        let reads = stream::iter(entries.into_iter().filter_map(|entry| {
            let name = entry.path.strip_prefix(&base)?.to_owned();
            Some((name, entry.path))
        }))
        .map(|(name, path)| async move {
            match with_retry("read ref", || self.store.get(&path)).await {
                Ok((data, rev)) => Ok(parse_ref(&name, &data, rev)),
                // Deleted between listing and read; drop it from the snapshot.
                Err(store::Error::NotFound(_)) => Ok(None),
                Err(e) => Err(Error::from(e)),
            }
        })
        .buffer_unordered(LIST_JOBS);

        let refs = reads
            .try_collect::<Vec<Option<(String, RemoteRef)>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();
        Ok(refs)
    }

    /// Read a single direct ref, `None` if absent or unparsable.
    pub async fn read_ref(&self, name: &str) -> Result<Option<RemoteRef>, Error> {
        let path = self.path(name);
        match with_retry("read ref", || self.store.get(&path)).await {
            Ok((data, rev)) => Ok(parse_ref(name, &data, rev).map(|(_, r)| r)),
            Err(store::Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a symbolic ref file, `None` if absent or unparsable.
    pub async fn get_symbolic(&self, name: &str) -> Result<Option<(String, Revision)>, Error> {
        let path = self.path(name);
        let (data, rev) = match with_retry("read symbolic ref", || self.store.get(&path)).await {
            Ok(found) => found,
            Err(store::Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let target = String::from_utf8(data)
            .ok()
            .as_deref()
            .and_then(|s| s.trim().strip_prefix("ref: ").map(str::to_owned));
        match target {
            Some(target) => Ok(Some((target.trim().to_owned(), rev))),
            None => {
                tracing::warn!(name, "ignoring malformed symbolic ref");
                Ok(None)
            },
        }
    }

    /// Conditionally point `name` at `id`.
    ///
    /// A failed precondition comes back as [`Error::Conflict`] so the push
    /// can be refused with "fetch first".
    pub async fn update_ref(
        &self,
        name: &str,
        id: &ObjectId,
        expect: Expect,
    ) -> Result<Revision, Error> {
        let path = self.path(name);
        let data = format!("{id}\n");
        let result = match &expect {
            Expect::Absent => {
                with_retry("create ref", || self.store.put_create(&path, data.as_bytes())).await
            },
            Expect::Rev(rev) => {
                with_retry("update ref", || {
                    self.store.put_update(&path, data.as_bytes(), rev)
                })
                .await
            },
            Expect::Force => {
                with_retry("overwrite ref", || {
                    self.store.put_overwrite(&path, data.as_bytes())
                })
                .await
            },
        };
        result.map_err(|e| conflict(name, e))
    }

    /// Delete `name`, refusing to delete the default branch.
    pub async fn delete_ref(&self, name: &str, rev: &Revision) -> Result<(), Error> {
        if let Some((target, _)) = self.get_symbolic(HEAD).await? {
            if target == name {
                return Err(Error::HeadProtected(name.to_owned()));
            }
        }
        let path = self.path(name);
        with_retry("delete ref", || self.store.delete(&path, rev))
            .await
            .map_err(|e| conflict(name, e))
    }

    /// Create `HEAD` at repository bootstrap.
    ///
    /// Returns `false` when another client bootstrapped concurrently, which
    /// is success for our purposes.
    pub async fn bootstrap_head(&self, target: &str) -> Result<bool, Error> {
        let path = self.path(HEAD);
        let data = format!("ref: {target}\n");
        match with_retry("create HEAD", || self.store.put_create(&path, data.as_bytes())).await {
            Ok(_) => Ok(true),
            Err(store::Error::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Repoint `HEAD` at an existing branch, compare-and-swap style.
    pub async fn set_head(&self, branch: &str) -> Result<(), Error> {
        let target = format!("refs/heads/{branch}");
        if self.read_ref(&target).await?.is_none() {
            return Err(Error::NoSuchRef(target));
        }

        let path = self.path(HEAD);
        let data = format!("ref: {target}\n");
        let result = match self.get_symbolic(HEAD).await? {
            Some((_, rev)) => {
                with_retry("update HEAD", || {
                    self.store.put_update(&path, data.as_bytes(), &rev)
                })
                .await
            },
            None => with_retry("create HEAD", || self.store.put_create(&path, data.as_bytes())).await,
        };
        result.map(|_| ()).map_err(|e| conflict(HEAD, e))
    }

    fn path(&self, name: &str) -> String {
        format!("{}/{}", self.root, name)
    }
}

//================================================================================================
// Functions
//================================================================================================

fn conflict(name: &str, e: store::Error) -> Error {
    match e {
        store::Error::AlreadyExists(_)
        | store::Error::RevMismatch(_)
        | store::Error::NotFound(_) => Error::Conflict(name.to_owned()),
        other => Error::Store(other),
    }
}

fn parse_ref(name: &str, data: &[u8], rev: Revision) -> Option<(String, RemoteRef)> {
    let id = std::str::from_utf8(data)
        .ok()
        .and_then(|s| ObjectId::from_hex(s.trim().as_bytes()).ok());
    match id {
        Some(id) => Some((name.to_owned(), RemoteRef { id, rev })),
        None => {
            tracing::warn!(name, "ignoring ref with non-hash contents");
            None
        },
    }
}
