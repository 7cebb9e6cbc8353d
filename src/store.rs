//! Collaborator interfaces consumed by the manifest loader and the embedder
//!
//! - [ResourceStore] serves resource bytes by absolute identifier.
//! - [KeyValueCache] keeps opaque strings, such as a serialized manifest.
//! - [Decryptor] turns a handle to encrypted bytes into decrypted bytes.
//! - [ManifestFetcher] retrieves manifest text from a URL.
//!
//! [HandleRegistry] plays the part of the object-URL table: every handle it
//! creates stays resolvable until it is revoked. [MemoryStore] is an
//! in-memory [ResourceStore] and [KeyValueCache].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;
use uuid::Uuid;

use crate::{
    error::EpubError,
    types::{BookResource, LocalHandle},
};

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns the stored resource for an absolute identifier
    ///
    /// A resource the store does not hold is reported as an empty
    /// [BookResource] rather than an error.
    async fn get_book_data(&self, identifier: &str) -> Result<BookResource, EpubError>;
}

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, EpubError>;

    async fn set(&self, key: &str, value: String) -> Result<(), EpubError>;
}

#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypts the bytes behind a local handle URL
    ///
    /// The handle is only guaranteed to resolve for the duration of the call.
    async fn decrypt_url(&self, url: &str) -> Result<Vec<u8>, EpubError>;
}

#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> Result<String, EpubError>;
}

/// Table of locally-addressable byte payloads
///
/// Clones share the same table, so a decryptor holding a clone can resolve
/// handles created by the embedder.
#[derive(Debug, Clone)]
pub struct HandleRegistry {
    origin: Arc<str>,
    entries: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::with_origin("epub")
    }

    /// Creates a registry whose handles look like `blob:<origin>/<uuid>`
    pub fn with_origin(origin: &str) -> Self {
        Self {
            origin: Arc::from(origin),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a payload and returns a fresh handle to it
    pub fn create(&self, data: impl Into<Bytes>) -> Result<LocalHandle, EpubError> {
        let url = format!("blob:{}/{}", self.origin, Uuid::new_v4());
        self.entries.lock()?.insert(url.clone(), data.into());
        Ok(LocalHandle { url })
    }

    /// Returns the payload behind a handle URL, if it has not been revoked
    pub fn resolve(&self, url: &str) -> Result<Option<Bytes>, EpubError> {
        Ok(self.entries.lock()?.get(url).cloned())
    }

    /// Releases a handle; returns whether it was still registered
    pub fn revoke(&self, handle: &LocalHandle) -> Result<bool, EpubError> {
        Ok(self.entries.lock()?.remove(handle.url()).is_some())
    }

    pub fn revoke_all<'a>(
        &self,
        handles: impl IntoIterator<Item = &'a LocalHandle>,
    ) -> Result<(), EpubError> {
        let mut entries = self.entries.lock()?;
        for handle in handles {
            entries.remove(handle.url());
        }
        Ok(())
    }

    /// Number of live handles
    pub fn len(&self) -> Result<usize, EpubError> {
        Ok(self.entries.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, EpubError> {
        Ok(self.entries.lock()?.is_empty())
    }
}

#[cfg(test)]
impl HandleRegistry {
    /// Poisons the table lock the way a panicking holder would
    pub(crate) fn poison(&self) {
        let entries = Arc::clone(&self.entries);
        let _ = std::thread::spawn(move || {
            let _guard = entries.lock();
            panic!("handle table holder panicked");
        })
        .join();
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory resource store and cache
#[derive(Debug, Default)]
pub struct MemoryStore {
    resources: Mutex<HashMap<String, Bytes>>,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the bytes of a resource under its absolute identifier
    pub fn insert_resource(
        &self,
        identifier: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<(), EpubError> {
        self.resources
            .lock()?
            .insert(identifier.into(), data.into());
        Ok(())
    }

    pub fn remove_resource(&self, identifier: &str) -> Result<Option<Bytes>, EpubError> {
        Ok(self.resources.lock()?.remove(identifier))
    }

    fn resource(&self, identifier: &str) -> Result<Option<Bytes>, EpubError> {
        Ok(self.resources.lock()?.get(identifier).cloned())
    }

    fn value(&self, key: &str) -> Result<Option<String>, EpubError> {
        Ok(self.values.lock()?.get(key).cloned())
    }

    fn set_value(&self, key: &str, value: String) -> Result<(), EpubError> {
        self.values.lock()?.insert(key.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_book_data(&self, identifier: &str) -> Result<BookResource, EpubError> {
        Ok(BookResource {
            data: self.resource(identifier)?,
        })
    }
}

#[async_trait]
impl KeyValueCache for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EpubError> {
        self.value(key)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), EpubError> {
        self.set_value(key, value)
    }
}
