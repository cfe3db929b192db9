//! An in-memory [`BlobStore`] for tests.
//!
//! Revisions are a global counter, so every write observably changes the tag.
//! Transient failures can be injected to exercise the retry layer.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{BlobStore, Entry, Error, Revision};

/// A process-local store backed by a map.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, (Vec<u8>, u64)>>,
    counter: AtomicU64,
    transient: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Make the next `n` calls fail with [`Error::Transient`].
    pub fn inject_transient(&self, n: usize) {
        self.transient.store(n, Ordering::SeqCst);
    }

    /// Number of files currently stored.
    pub fn len(&self) -> usize {
        self.files.lock().expect("store poisoned").len()
    }

    /// Read a file's contents outside the trait, for assertions.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .expect("store poisoned")
            .get(path)
            .map(|(data, _)| data.clone())
    }

    fn tick(&self) -> Result<(), Error> {
        let remaining = self.transient.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transient("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Revision), Error> {
        self.tick()?;
        self.files
            .lock()
            .expect("store poisoned")
            .get(path)
            .map(|(data, rev)| (data.clone(), Revision::new(format!("r{rev:08}"))))
            .ok_or_else(|| Error::NotFound(path.into()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Entry>, Error> {
        self.tick()?;
        let dir = format!("{prefix}/");
        let entries: Vec<Entry> = self
            .files
            .lock()
            .expect("store poisoned")
            .iter()
            .filter(|(path, _)| path.starts_with(&dir))
            .map(|(path, (_, rev))| Entry {
                path: path.clone(),
                rev: Revision::new(format!("r{rev:08}")),
            })
            .collect();
        if entries.is_empty() {
            return Err(Error::NotFound(prefix.into()));
        }
        Ok(entries)
    }

    async fn put_create(&self, path: &str, data: &[u8]) -> Result<Revision, Error> {
        self.tick()?;
        let rev = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.lock().expect("store poisoned");
        if files.contains_key(path) {
            return Err(Error::AlreadyExists(path.into()));
        }
        files.insert(path.into(), (data.to_vec(), rev));
        Ok(Revision::new(format!("r{rev:08}")))
    }

    async fn put_update(
        &self,
        path: &str,
        data: &[u8],
        expected: &Revision,
    ) -> Result<Revision, Error> {
        self.tick()?;
        let rev = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut files = self.files.lock().expect("store poisoned");
        match files.get(path) {
            None => Err(Error::NotFound(path.into())),
            Some((_, current)) if format!("r{current:08}") != expected.as_str() => {
                Err(Error::RevMismatch(path.into()))
            },
            Some(_) => {
                files.insert(path.into(), (data.to_vec(), rev));
                Ok(Revision::new(format!("r{rev:08}")))
            },
        }
    }

    async fn put_overwrite(&self, path: &str, data: &[u8]) -> Result<Revision, Error> {
        self.tick()?;
        let rev = self.counter.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .expect("store poisoned")
            .insert(path.into(), (data.to_vec(), rev));
        Ok(Revision::new(format!("r{rev:08}")))
    }

    async fn delete(&self, path: &str, expected: &Revision) -> Result<(), Error> {
        self.tick()?;
        let mut files = self.files.lock().expect("store poisoned");
        match files.get(path) {
            None => Err(Error::NotFound(path.into())),
            Some((_, current)) if format!("r{current:08}") != expected.as_str() => {
                Err(Error::RevMismatch(path.into()))
            },
            Some(_) => {
                files.remove(path);
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_update_delete_roundtrip() -> Result<(), Error> {
        let store = MemoryStore::new();
        let r1 = store.put_create("/a/b", b"one").await?;
        assert!(matches!(
            store.put_create("/a/b", b"two").await,
            Err(Error::AlreadyExists(_))
        ));

        let r2 = store.put_update("/a/b", b"two", &r1).await?;
        assert_ne!(r1, r2);
        assert!(matches!(
            store.put_update("/a/b", b"three", &r1).await,
            Err(Error::RevMismatch(_))
        ));

        assert!(matches!(
            store.delete("/a/b", &r1).await,
            Err(Error::RevMismatch(_))
        ));
        store.delete("/a/b", &r2).await?;
        assert!(matches!(store.get("/a/b").await, Err(Error::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn list_is_recursive_and_distinguishes_absent_prefix() -> Result<(), Error> {
        let store = MemoryStore::new();
        store.put_overwrite("/r/refs/heads/master", b"x").await?;
        store.put_overwrite("/r/refs/tags/v1", b"y").await?;
        store.put_overwrite("/r/HEAD", b"z").await?;

        let entries = store.list("/r/refs").await?;
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            store.list("/other/refs").await,
            Err(Error::NotFound(_))
        ));
        Ok(())
    }
}
