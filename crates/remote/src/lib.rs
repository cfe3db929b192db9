//! # Remote Crate
//!
//! The `remote` crate is the engine behind the `git-remote-dropbox` helper:
//! everything needed to treat a revision-tagged file store as a first-class
//! Git remote, with the same safety under concurrent pushers as a native
//! one.
//!
//! ## Architecture
//!
//! The crate is organized into several key modules:
//! - [`url`] - `dropbox://` remote URL parsing
//! - [`store`] - the abstract blob store, its Dropbox binding, and retry
//! - [`object`] - loose-object encoding and object-graph traversal
//! - [`git`] - access to the local repository through the `git` binary
//! - [`refs`] - the remote ref database, built on compare-and-swap writes
//! - [`transfer`] - the bounded-concurrency object transfer pool
//! - [`helper`] - the remote-helper protocol engine itself
//!
//! ## Consistency model
//!
//! Objects are immutable and content-addressed; refs are tiny files updated
//! only by conditional writes against the revision tag observed beforehand.
//! A ref never moves until the full closure of its new target is durable on
//! the store, so a reader following any ref always finds every object it
//! needs.
#![warn(missing_docs)]

pub mod git;
pub mod helper;
pub mod object;
pub mod refs;
pub mod store;
pub mod transfer;
pub mod url;

#[cfg(test)]
pub(crate) mod testutil;

pub use helper::Helper;
pub use store::BlobStore;
pub use store::dropbox::DropboxStore;
pub use url::{RemoteUrl, TokenSelector};
