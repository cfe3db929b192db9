//! # Concurrent Object Transfer
//!
//! A bounded pool of workers moves loose objects between the local
//! repository and the store. Uploads fan out one task per object; downloads
//! walk the object graph in waves, fetching a frontier concurrently and
//! feeding the referents back in as the next frontier.
//!
//! Both directions are safe to parallelize because everything is
//! content-addressed: racing writers produce identical bytes, and a lost
//! `AlreadyExists` from another pusher is success. The first terminal
//! failure tears the stream down, cancelling the in-flight siblings.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use gix::ObjectId;
use gix::objs::Kind;
use thiserror::Error as ThisError;

use crate::git::{self, GitProcess};
use crate::object;
use crate::store::retry::with_retry;
use crate::store::{self, BlobStore};

/// Default worker count for object transfer.
pub const DEFAULT_JOBS: usize = 8;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while moving objects.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A downloaded object hashed to something other than its name.
    ///
    /// This means the store is corrupt; nothing sensible can continue.
    #[error("object downloaded as {want} hashed to {got}")]
    Corrupt {
        /// The hash the object was stored under.
        want: ObjectId,
        /// The hash of the bytes actually received.
        got: ObjectId,
    },
    /// A transparent wrapper for a [`git::Error`]
    #[error(transparent)]
    Git(#[from] git::Error),
    /// A transparent wrapper for a [`object::Error`]
    #[error(transparent)]
    Object(#[from] object::Error),
    /// A transparent wrapper for a [`store::Error`]
    #[error(transparent)]
    Store(#[from] store::Error),
}

/// The worker pool, bound to one repository root on one store.
pub struct Transfer {
    store: Arc<dyn BlobStore>,
    git: GitProcess,
    root: String,
    jobs: usize,
}

//================================================================================================
// Impls
//================================================================================================

impl Transfer {
    /// A pool of `jobs` workers against `root` inside `store`.
    pub fn new(
        store: Arc<dyn BlobStore>,
        git: GitProcess,
        root: impl Into<String>,
        jobs: usize,
    ) -> Self {
        Transfer {
            store,
            git,
            root: root.into(),
            jobs: jobs.max(1),
        }
    }

    /// Upload every listed object, returning how many were transferred.
    ///
    /// Objects that appear on the store mid-flight (a racing pusher) are
    /// counted as transferred; by the content-addressed invariant the bytes
    /// are identical.
    pub async fn upload_missing(&self, missing: &[ObjectId]) -> Result<usize, Error> {
        stream::iter(missing)
            .map(|id| self.upload_one(id))
            .buffer_unordered(self.jobs)
            .try_collect::<Vec<()>>()
            .await
            .map(|uploaded| uploaded.len())
    }

    /// Download the transitive closure of `roots` into the local repository.
    ///
    /// Returns how many objects were installed. Sub-graphs already complete
    /// locally are pruned: trees and blobs on presence alone, commits only
    /// once their whole ancestry is reachable, so a partial local clone still
    /// converges.
    pub async fn download_closure(&self, roots: Vec<ObjectId>) -> Result<usize, Error> {
        let mut visited: HashSet<ObjectId> = roots.iter().copied().collect();
        let mut frontier = roots;
        let mut installed = 0;

        while !frontier.is_empty() {
            let wave: Vec<(bool, Vec<ObjectId>)> = stream::iter(frontier.drain(..))
                .map(|id| async move { self.step(&id).await })
                .buffer_unordered(self.jobs)
                .try_collect()
                .await?;

            for (fetched, referents) in wave {
                installed += usize::from(fetched);
                for id in referents {
                    if visited.insert(id) {
                        frontier.push(id);
                    }
                }
            }
        }
        Ok(installed)
    }

    async fn upload_one(&self, id: &ObjectId) -> Result<(), Error> {
        let (kind, data) = self.git.cat_object(id).await?;
        let bytes = object::encode_loose(kind, &data)?;
        let path = object::store_path(&self.root, id);
        match with_retry("upload object", || self.store.put_create(&path, &bytes)).await {
            Ok(_) => Ok(()),
            Err(store::Error::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Process one node of the walk: prune, read locally, or download.
    ///
    /// Returns whether an object was installed, and the referents to keep
    /// walking into.
    async fn step(&self, id: &ObjectId) -> Result<(bool, Vec<ObjectId>), Error> {
        if self.git.object_exists(id).await? {
            let kind = self.git.object_kind(id).await?;
            match kind {
                Kind::Blob | Kind::Tree => return Ok((false, Vec::new())),
                Kind::Commit if self.git.history_exists(id).await? => {
                    return Ok((false, Vec::new()));
                },
                // A present commit with missing ancestry, or a tag: keep
                // walking, but read the referents locally.
                _ => {
                    let (kind, data) = self.git.cat_object(id).await?;
                    return Ok((false, object::referents(kind, &data)?));
                },
            }
        }

        let path = object::store_path(&self.root, id);
        let (bytes, _) = with_retry("download object", || self.store.get(&path)).await?;
        let (kind, data) = object::decode_loose(&bytes)?;
        let written = self.git.write_object(kind, &data).await?;
        if written != *id {
            return Err(Error::Corrupt {
                want: *id,
                got: written,
            });
        }
        Ok((true, object::referents(kind, &data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{commit_file, scratch_repo};

    fn pool(store: &Arc<MemoryStore>, git: &GitProcess) -> Transfer {
        Transfer::new(store.clone(), git.clone(), "/t/repo", 4)
    }

    #[tokio::test]
    async fn upload_then_download_into_a_fresh_repository() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (src_dir, src) = scratch_repo().await?;
        let c1 = commit_file(src_dir.path(), "bar", "foo\n", "c1").await?;

        let missing = src.rev_list_missing(&[c1], &[]).await?;
        let uploaded = pool(&store, &src).upload_missing(&missing).await?;
        assert_eq!(uploaded, missing.len());
        assert_eq!(store.len(), missing.len());

        // Every stored file decodes back to the object it is named after.
        let path = object::store_path("/t/repo", &c1);
        let (kind, data) = object::decode_loose(&store.contents(&path).unwrap())?;
        assert_eq!(kind, Kind::Commit);
        assert_eq!(object::hash_of(kind, &data)?, c1);

        let (dst_dir, dst) = scratch_repo().await?;
        let installed = pool(&store, &dst).download_closure(vec![c1]).await?;
        assert_eq!(installed, missing.len());
        assert!(dst.history_exists(&c1).await?);
        let (_, payload) = dst.cat_object(&c1).await?;
        assert_eq!(object::hash_of(Kind::Commit, &payload)?, c1);
        drop((src_dir, dst_dir));
        Ok(())
    }

    #[tokio::test]
    async fn second_upload_is_a_noop_conflict() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (dir, git) = scratch_repo().await?;
        let c1 = commit_file(dir.path(), "bar", "foo\n", "c1").await?;
        let missing = git.rev_list_missing(&[c1], &[]).await?;

        let pool = pool(&store, &git);
        pool.upload_missing(&missing).await?;
        // Re-uploading the same objects races against "another writer" (our
        // first pass) and must still report success.
        let again = pool.upload_missing(&missing).await?;
        assert_eq!(again, missing.len());
        assert_eq!(store.len(), missing.len());
        Ok(())
    }

    #[tokio::test]
    async fn download_prunes_sub_graphs_that_are_already_local() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (dir, git) = scratch_repo().await?;
        let c1 = commit_file(dir.path(), "bar", "one\n", "c1").await?;
        let c2 = commit_file(dir.path(), "bar", "two\n", "c2").await?;

        let all = git.rev_list_missing(&[c2], &[]).await?;
        let src_pool = pool(&store, &git);
        src_pool.upload_missing(&all).await?;

        // The destination already has c1's history: only c2's delta moves.
        let (dst_dir, dst) = scratch_repo().await?;
        let delta = git.rev_list_missing(&[c1], &[]).await?;
        let dst_pool = pool(&store, &dst);
        dst_pool.download_closure(vec![c1]).await?;
        assert!(dst.history_exists(&c1).await?);

        let installed = dst_pool.download_closure(vec![c2]).await?;
        assert_eq!(installed, all.len() - delta.len());
        assert!(dst.history_exists(&c2).await?);
        drop((dir, dst_dir));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_store_contents_are_fatal() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (dir, git) = scratch_repo().await?;
        let c1 = commit_file(dir.path(), "bar", "foo\n", "c1").await?;
        let missing = git.rev_list_missing(&[c1], &[]).await?;
        pool(&store, &git).upload_missing(&missing).await?;

        // Swap the commit's stored bytes for a validly-encoded other object.
        let path = object::store_path("/t/repo", &c1);
        let forged = object::encode_loose(Kind::Blob, b"not the commit")?;
        store.put_overwrite(&path, &forged).await?;

        let (_dst_dir, dst) = scratch_repo().await?;
        let err = pool(&store, &dst)
            .download_closure(vec![c1])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
        drop(dir);
        Ok(())
    }
}
