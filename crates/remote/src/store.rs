//! # Blob Store Interface
//!
//! This module defines the abstract contract the rest of the crate is written
//! against: a network file store with per-file revision tags. The concrete
//! binding used by the shipped binary lives in [`dropbox`]; tests run against
//! an in-memory implementation.
//!
//! Every write primitive is conditional. `put_create` fails if the file
//! exists, `put_update` fails unless the stored revision matches the expected
//! one, and `delete` takes the same precondition. Together these give the ref
//! machinery compare-and-swap semantics without any server-side code.

pub mod dropbox;
#[cfg(test)]
pub(crate) mod memory;
pub mod retry;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error as ThisError;

//================================================================================================
// Types
//================================================================================================

/// A single file reported by [`BlobStore::list`].
#[derive(Clone, Debug)]
pub struct Entry {
    /// Full store path of the file.
    pub path: String,
    /// The revision tag of its current content.
    pub rev: Revision,
}

/// An error surfaced by a store operation.
///
/// `Transient` is the only kind the retry layer will re-attempt; everything
/// else is terminal for the individual call and must be handled by the
/// caller.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The file already exists and the write required it not to.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The store rejected the bearer token.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The file does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The stored revision no longer matches the expected one.
    #[error("revision mismatch: {0}")]
    RevMismatch(String),
    /// A network or service-side condition worth retrying.
    #[error("transient store failure: {0}")]
    Transient(String),
}

/// An opaque, server-assigned revision tag.
///
/// The tag changes on every write to the file it belongs to. It is only ever
/// compared for equality and echoed back as a write precondition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revision(String);

//================================================================================================
// Traits
//================================================================================================

/// File CRUD against the backing store, with revision-tagged writes.
///
/// Paths are absolute, `/`-separated and never end in a slash. Implementations
/// must be safe to share across concurrent transfer workers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a file and its current revision.
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Revision), Error>;

    /// Recursively list the files under `prefix`.
    ///
    /// A missing prefix is reported as [`Error::NotFound`], not as an empty
    /// listing, so callers can tell a fresh repository from an empty folder.
    async fn list(&self, prefix: &str) -> Result<Vec<Entry>, Error>;

    /// Write a file that must not yet exist.
    async fn put_create(&self, path: &str, data: &[u8]) -> Result<Revision, Error>;

    /// Overwrite a file only if its revision still equals `expected`.
    async fn put_update(&self, path: &str, data: &[u8], expected: &Revision)
    -> Result<Revision, Error>;

    /// Overwrite a file unconditionally.
    async fn put_overwrite(&self, path: &str, data: &[u8]) -> Result<Revision, Error>;

    /// Delete a file only if its revision still equals `expected`.
    async fn delete(&self, path: &str, expected: &Revision) -> Result<(), Error>;
}

//================================================================================================
// Impls
//================================================================================================

impl Error {
    /// Whether the retry layer may re-attempt the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl Revision {
    /// Wrap a server-assigned tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Revision(tag.into())
    }

    /// The raw tag, for echoing back to the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Revision {
    fn from(tag: String) -> Self {
        Revision(tag)
    }
}
