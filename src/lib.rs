//! git-remote-dropbox, a Git remote helper that stores repositories in
//! Dropbox with the same safety under concurrent pushers as a native remote.

#![warn(missing_docs)]

pub mod cli;
