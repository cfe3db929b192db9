//! # Loose Object Codec
//!
//! Git objects travel to and from the store as single zlib-compressed files,
//! one per object, laid out exactly like a bare repository's `objects/` tree.
//! This module owns that encoding: hash-to-path mapping, the
//! `"<type> <len>\0<payload>"` framing, and referent extraction so the fetch
//! walk can follow the object graph without a local copy.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use gix::ObjectId;
use gix::objs::{CommitRefIter, Kind, TagRefIter, TreeRefIter, decode, encode};
use thiserror::Error as ThisError;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while encoding, decoding, or hashing an object.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A transparent wrapper for a [`gix::objs::decode::Error`]
    #[error(transparent)]
    Decode(#[from] gix::objs::decode::Error),
    /// A transparent wrapper for a [`gix::hash::hasher::Error`]
    #[error(transparent)]
    Hash(#[from] gix::hash::hasher::Error),
    /// A transparent wrapper for a [`gix::objs::decode::LooseHeaderDecodeError`]
    #[error(transparent)]
    Header(#[from] gix::objs::decode::LooseHeaderDecodeError),
    /// A transparent wrapper for a [`std::io::Error`]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The header length does not match the decompressed payload.
    #[error("loose object payload is {actual} bytes but the header claims {expected}")]
    SizeMismatch {
        /// The length the header claims.
        expected: u64,
        /// The length actually decompressed.
        actual: u64,
    },
}

//================================================================================================
// Functions
//================================================================================================

/// Map an object hash to its path under the repository root.
pub fn store_path(root: &str, id: &ObjectId) -> String {
    let hex = id.to_string();
    format!("{root}/objects/{}/{}", &hex[..2], &hex[2..])
}

/// Frame and compress a raw object payload into loose-object file contents.
pub fn encode_loose(kind: Kind, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut enc = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        Compression::default(),
    );
    enc.write_all(&encode::loose_header(kind, data.len() as u64))?;
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

/// Decompress loose-object file contents into its kind and raw payload.
pub fn decode_loose(bytes: &[u8]) -> Result<(Kind, Vec<u8>), Error> {
    let mut raw = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut raw)?;
    let (kind, size, consumed) = decode::loose_header(&raw)?;
    let payload = raw.split_off(consumed);
    if payload.len() as u64 != size {
        return Err(Error::SizeMismatch {
            expected: size,
            actual: payload.len() as u64,
        });
    }
    Ok((kind, payload))
}

/// The content hash of a raw object payload.
pub fn hash_of(kind: Kind, data: &[u8]) -> Result<ObjectId, Error> {
    Ok(gix::objs::compute_hash(
        gix::hash::Kind::Sha1,
        kind,
        data,
    )?)
}

/// Every object a raw payload points at.
///
/// Commits yield their tree and parents, trees their entries, tags their
/// target; blobs are leaves.
pub fn referents(kind: Kind, data: &[u8]) -> Result<Vec<ObjectId>, Error> {
    match kind {
        Kind::Blob => Ok(Vec::new()),
        Kind::Commit => {
            let mut iter = CommitRefIter::from_bytes(data);
            let mut ids = vec![iter.tree_id()?];
            ids.extend(iter.parent_ids());
            Ok(ids)
        },
        Kind::Tag => {
            let mut iter = TagRefIter::from_bytes(data);
            Ok(vec![iter.target_id()?])
        },
        Kind::Tree => {
            let mut ids = Vec::new();
            for entry in TreeRefIter::from_bytes(data) {
                ids.push(entry?.oid.to_owned());
            }
            Ok(ids)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = "89cf73e2a0b9ab1c21972ba9f9b5e6cbefef62ae";
    const PARENT: &str = "2d4d3c4a7b5e2f4d6e8f9a0b1c2d3e4f5a6b7c8d";

    fn commit_payload() -> Vec<u8> {
        format!(
            "tree {TREE}\nparent {PARENT}\nauthor A <a@b.c> 1700000000 +0000\ncommitter A <a@b.c> 1700000000 +0000\n\nmsg\n"
        )
        .into_bytes()
    }

    #[test]
    fn loose_roundtrip() -> Result<(), Error> {
        let payload = b"test content\n";
        let bytes = encode_loose(Kind::Blob, payload)?;
        let (kind, decoded) = decode_loose(&bytes)?;
        assert_eq!(kind, Kind::Blob);
        assert_eq!(decoded, payload);
        Ok(())
    }

    #[test]
    fn hash_matches_git() -> Result<(), Error> {
        // `echo 'test content' | git hash-object --stdin`
        let id = hash_of(Kind::Blob, b"test content\n")?;
        assert_eq!(id.to_string(), "d670460b4b4aece5915caf5c68d12f560a9fe3e4");
        Ok(())
    }

    #[test]
    fn store_path_fans_out_on_the_first_byte() {
        let id = ObjectId::from_hex(b"d670460b4b4aece5915caf5c68d12f560a9fe3e4").unwrap();
        assert_eq!(
            store_path("/t/s1", &id),
            "/t/s1/objects/d6/70460b4b4aece5915caf5c68d12f560a9fe3e4"
        );
    }

    #[test]
    fn commit_referents_are_tree_then_parents() -> Result<(), Error> {
        let ids = referents(Kind::Commit, &commit_payload())?;
        let hex: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(hex, vec![TREE.to_owned(), PARENT.to_owned()]);
        Ok(())
    }

    #[test]
    fn blob_is_a_leaf() -> Result<(), Error> {
        assert!(referents(Kind::Blob, b"anything")?.is_empty());
        Ok(())
    }

    #[test]
    fn truncated_loose_object_is_rejected() {
        let payload = b"test content\n";
        let bytes = encode_loose(Kind::Blob, payload).unwrap();
        assert!(decode_loose(&bytes[..bytes.len() - 4]).is_err());
    }
}
