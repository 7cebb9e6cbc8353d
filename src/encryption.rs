//! Encryption manifest model
//!
//! An [EncryptionManifest] is built from the tree form of a container's
//! `META-INF/encryption.xml` and answers one question: does a resource
//! identifier refer to an encrypted resource?
//!
//! Loading is cache-first. When [LoadOptions] carries a cache that already
//! holds the manifest's transport text, that text is used as is, without
//! asking the network whether it is stale. Otherwise the manifest is fetched,
//! converted and written through to the cache.

use std::borrow::Cow;

use bytes::Bytes;
use log::{debug, info, warn};
use quick_xml::{NsReader, events::Event};
use url::Url;

use crate::{
    error::EpubError,
    store::{Decryptor, HandleRegistry, KeyValueCache, ManifestFetcher},
    tree::TreeConverter,
    types::{LocalHandle, TreeValue},
    utils::DecodeBytes,
};

/// The cache key used when none is configured
pub const DEFAULT_CACHE_KEY: &str = "encryption";

const ENCRYPTION: &str = "encryption";
const ENCRYPTED_DATA: &str = "enc:EncryptedData";
const CIPHER_DATA: &str = "enc:CipherData";
const CIPHER_REFERENCE: &str = "enc:CipherReference";
const URI: &str = "URI";

/// Options of [EncryptionManifest::load]
///
/// | cache   | behavior                                                    |
/// |---------|-------------------------------------------------------------|
/// | absent  | always fetch; nothing is persisted                          |
/// | present | return the cached manifest if any, else fetch and store it  |
///
/// The cache is never required for loading to succeed: an entry that cannot
/// be read or parsed is logged and the manifest fetched, and a failed write
/// is logged and the fetched manifest returned.
#[derive(Clone)]
pub struct LoadOptions<'a> {
    pub cache: Option<&'a dyn KeyValueCache>,
    pub cache_key: Cow<'a, str>,
}

impl<'a> LoadOptions<'a> {
    pub fn new() -> Self {
        Self {
            cache: None,
            cache_key: Cow::Borrowed(DEFAULT_CACHE_KEY),
        }
    }

    pub fn with_cache(mut self, cache: &'a dyn KeyValueCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<Cow<'a, str>>) -> Self {
        self.cache_key = key.into();
        self
    }
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// The list of encrypted resources declared by a container
///
/// The resource list is extracted once, at construction, and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionManifest {
    url: Url,
    tree: TreeValue,
    resources: Vec<String>,
}

impl EncryptionManifest {
    /// Loads the manifest at `url`
    ///
    /// ## Return
    /// - `Ok(EncryptionManifest)`: from the cache, or freshly fetched
    /// - `Err(EpubError::ManifestUnavailable)`: the fetch failed or the text is not XML
    /// - `Err(EpubError::ManifestMalformed)`: the document lacks the expected structure
    pub async fn load(
        url: Url,
        fetcher: &dyn ManifestFetcher,
        options: &LoadOptions<'_>,
    ) -> Result<Self, EpubError> {
        if let Some(cache) = options.cache {
            let cached = cache
                .get(&options.cache_key)
                .await
                .and_then(|text| match text {
                    Some(text) => Self::from_cache_text(&text, url.clone()).map(Some),
                    None => Ok(None),
                });

            match cached {
                Ok(Some(manifest)) => {
                    debug!("Encryption manifest for {} served from cache", url);
                    return Ok(manifest);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "Ignoring cached encryption manifest \"{}\": {}",
                        options.cache_key, err
                    );
                }
            }
        }

        let unavailable = |err: EpubError| EpubError::ManifestUnavailable {
            url: url.to_string(),
            source: Box::new(err),
        };

        debug!("Fetching encryption manifest {}", url);
        let text = fetcher.fetch_text(&url).await.map_err(unavailable)?;
        let tree = TreeConverter::parse_str(&text).map_err(unavailable)?;

        if let Some(cache) = options.cache {
            let stored = match serde_json::to_string(&tree) {
                Ok(text) => cache.set(&options.cache_key, text).await,
                Err(err) => Err(EpubError::from(err)),
            };
            if let Err(err) = stored {
                warn!(
                    "Failed to cache encryption manifest \"{}\": {}",
                    options.cache_key, err
                );
            }
        }

        Self::from_tree(tree, url)
    }

    /// Builds a manifest from the converted document tree
    pub fn from_tree(tree: TreeValue, url: Url) -> Result<Self, EpubError> {
        let resources = Self::encrypted_resources(&tree)?;
        info!(
            "Encryption manifest {} lists {} encrypted resources",
            url,
            resources.len()
        );

        Ok(Self {
            url,
            tree,
            resources,
        })
    }

    /// Builds a manifest from the transport text written by [to_cache_text](Self::to_cache_text)
    pub fn from_cache_text(text: &str, url: Url) -> Result<Self, EpubError> {
        let tree = serde_json::from_str::<TreeValue>(text)?;
        Self::from_tree(tree, url)
    }

    /// Serializes the manifest tree to its transport text
    pub fn to_cache_text(&self) -> Result<String, EpubError> {
        Ok(serde_json::to_string(&self.tree)?)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The encrypted resource paths, in manifest order
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Whether `resource` names an encrypted resource
    ///
    /// Any manifest path contained in `resource` counts as a match, so an
    /// absolute identifier matches the container-relative manifest path it
    /// ends with. A path that is a substring of another resource's path
    /// will also match that resource.
    pub fn is_encrypted(&self, resource: &str) -> bool {
        if resource.is_empty() {
            return false;
        }

        self.resources
            .iter()
            .any(|encrypted| resource.contains(encrypted.as_str()))
    }

    /// Decrypts a payload into a new local handle
    ///
    /// The encrypted bytes are handed to the decryptor through a temporary
    /// handle that is revoked once the decryptor returns. The returned handle
    /// belongs to the caller.
    pub async fn decrypt_to_handle(
        &self,
        data: Bytes,
        decryptor: &dyn Decryptor,
        registry: &HandleRegistry,
    ) -> Result<LocalHandle, EpubError> {
        let decrypted = Self::decrypt_bytes(data, decryptor, registry).await?;
        registry.create(decrypted)
    }

    /// Decrypts an XHTML content document and returns the markup inside its document element
    pub async fn decrypt_document(
        &self,
        data: Bytes,
        decryptor: &dyn Decryptor,
        registry: &HandleRegistry,
    ) -> Result<String, EpubError> {
        let decrypted = Self::decrypt_bytes(data, decryptor, registry).await?;
        let content = decrypted.decode()?;
        inner_markup(&content)
    }

    async fn decrypt_bytes(
        data: Bytes,
        decryptor: &dyn Decryptor,
        registry: &HandleRegistry,
    ) -> Result<Vec<u8>, EpubError> {
        let encrypted = registry.create(data)?;
        let result = decryptor.decrypt_url(encrypted.url()).await;
        if let Err(err) = registry.revoke(&encrypted) {
            warn!("Failed to release temporary handle {}: {}", encrypted, err);
        }

        result.map_err(|err| EpubError::DecryptionFailure {
            resource: encrypted.url().to_string(),
            reason: err.to_string(),
        })
    }

    /// Walks `encryption / enc:EncryptedData* / enc:CipherData / enc:CipherReference @URI`
    fn encrypted_resources(tree: &TreeValue) -> Result<Vec<String>, EpubError> {
        let malformed = |path: &[&str]| EpubError::ManifestMalformed {
            path: path.join("/"),
        };

        let encryption = tree
            .as_element()
            .and_then(|document| document.child(ENCRYPTION))
            .and_then(|slot| slot.as_single())
            .and_then(TreeValue::as_element)
            .ok_or_else(|| malformed(&[ENCRYPTION]))?;

        // An encryption element without entries declares nothing encrypted
        let Some(entries) = encryption.child(ENCRYPTED_DATA) else {
            return Ok(Vec::new());
        };

        let mut resources = Vec::with_capacity(entries.len());
        for entry in entries.as_slice() {
            let uri = entry
                .as_element()
                .and_then(|data| data.child(CIPHER_DATA))
                .and_then(|slot| slot.as_single())
                .and_then(TreeValue::as_element)
                .and_then(|cipher| cipher.child(CIPHER_REFERENCE))
                .and_then(|slot| slot.as_single())
                .and_then(TreeValue::as_element)
                .and_then(|reference| reference.attribute(URI))
                .ok_or_else(|| {
                    malformed(&[
                        ENCRYPTION,
                        ENCRYPTED_DATA,
                        CIPHER_DATA,
                        CIPHER_REFERENCE,
                        "@attributes",
                        URI,
                    ])
                })?;

            if uri.is_empty() {
                warn!("Skipping encrypted data entry with an empty URI");
                continue;
            }
            resources.push(uri.to_string());
        }

        Ok(resources)
    }
}

/// Returns the text between the document element's start and end tags
fn inner_markup(content: &str) -> Result<String, EpubError> {
    let mut reader = NsReader::from_str(content);
    let mut depth = 0usize;
    let mut start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(_) => {
                if depth == 0 {
                    start = Some(reader.buffer_position() as usize);
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(start) = start {
                        return Ok(content[start..before].to_string());
                    }
                }
            }
            Event::Empty(_) if depth == 0 => return Ok(String::new()),
            Event::Eof => break,
            _ => {}
        }
    }

    Err(EpubError::FailedParsingXml)
}
