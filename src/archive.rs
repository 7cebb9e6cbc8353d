//! EPUB container access
//!
//! [ArchiveStore] serves the entries of an OCF (zip) container as book
//! resources. Resources are addressed by absolute identifiers built on a base
//! URL standing for the container root, so `https://book/OEBPS/cover.jpg`
//! with base `https://book/` reads the entry `OEBPS/cover.jpg`.

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
    sync::Mutex,
};

use async_trait::async_trait;
use log::debug;
use percent_encoding::percent_decode_str;
use url::Url;
use zip::{ZipArchive, result::ZipError};

use crate::{
    error::EpubError,
    store::{ManifestFetcher, ResourceStore},
    types::BookResource,
    utils::{DecodeBytes, compression_method_check, get_file_in_zip_archive},
};

/// Location of the encryption manifest inside a container
pub const ENCRYPTION_ENTRY: &str = "META-INF/encryption.xml";

pub struct ArchiveStore<R: Read + Seek> {
    archive: Mutex<ZipArchive<R>>,
    base: Url,
}

impl<R: Read + Seek> ArchiveStore<R> {
    /// Opens a container from a reader
    ///
    /// ## Parameters
    /// - `reader`: The data source of the zip container
    /// - `base`: The absolute URL standing for the container root
    ///
    /// ## Return
    /// - `Ok(ArchiveStore)`: The container is readable
    /// - `Err(EpubError)`: The data is not a zip archive, or an entry uses a
    ///   compression method other than Stored or Deflated
    pub fn from_reader(reader: R, base: Url) -> Result<Self, EpubError> {
        let mut archive = ZipArchive::new(reader)?;
        compression_method_check(&mut archive)?;

        debug!("Opened container with {} entries at {}", archive.len(), base);
        Ok(Self {
            archive: Mutex::new(archive),
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Absolute identifier of the container's encryption manifest
    pub fn encryption_url(&self) -> Result<Url, EpubError> {
        Ok(self.base.join(ENCRYPTION_ENTRY)?)
    }

    /// Whether the container carries an encryption manifest at all
    pub fn has_encryption(&self) -> Result<bool, EpubError> {
        Ok(self.archive.lock()?.index_for_name(ENCRYPTION_ENTRY).is_some())
    }

    /// Maps an absolute identifier to the name of its container entry
    ///
    /// Identifiers outside the base URL cannot address an entry and are
    /// reported as [EpubError::RelativeLinkLeakage].
    pub fn entry_name(&self, identifier: &str) -> Result<String, EpubError> {
        let path = identifier
            .strip_prefix(self.base.as_str())
            .filter(|path| !path.is_empty())
            .ok_or_else(|| EpubError::RelativeLinkLeakage {
                path: identifier.to_string(),
            })?;
        let path = path.split(|ch| ch == '?' || ch == '#').next().unwrap_or_default();

        Ok(percent_decode_str(path).decode_utf8_lossy().into_owned())
    }

    /// Reads one entry; `Ok(None)` when the container has no such entry
    fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>, EpubError> {
        let mut archive = self.archive.lock()?;
        match get_file_in_zip_archive(&mut archive, name) {
            Ok(data) => Ok(Some(data)),
            Err(EpubError::ArchiveError {
                source: ZipError::FileNotFound,
            }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl ArchiveStore<BufReader<File>> {
    /// Opens a container file
    pub fn open<P: AsRef<Path>>(path: P, base: Url) -> Result<Self, EpubError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), base)
    }
}

#[async_trait]
impl<R: Read + Seek + Send> ResourceStore for ArchiveStore<R> {
    async fn get_book_data(&self, identifier: &str) -> Result<BookResource, EpubError> {
        let name = self.entry_name(identifier)?;
        match self.read_entry(&name)? {
            Some(data) => Ok(BookResource::new(data)),
            None => {
                debug!("Container has no entry {}", name);
                Ok(BookResource::empty())
            }
        }
    }
}

#[async_trait]
impl<R: Read + Seek + Send> ManifestFetcher for ArchiveStore<R> {
    async fn fetch_text(&self, url: &Url) -> Result<String, EpubError> {
        let name = self.entry_name(url.as_str())?;
        let data = self
            .read_entry(&name)?
            .ok_or_else(|| EpubError::ResourceNotFound { resource: name })?;

        data.decode()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use url::Url;
    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    use crate::{
        archive::ArchiveStore,
        embed::AssetEmbedder,
        embed::EmbedConfig,
        encryption::{EncryptionManifest, LoadOptions},
        error::EpubError,
        store::{HandleRegistry, ManifestFetcher, MemoryStore, ResourceStore},
    };

    const ENCRYPTION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container" xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
  <enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
    <enc:CipherData>
      <enc:CipherReference URI="OEBPS/images/cover.jpg"/>
    </enc:CipherData>
  </enc:EncryptedData>
</encryption>"#;

    fn build_archive(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    fn base() -> Url {
        Url::parse("https://book/").unwrap()
    }

    #[test]
    fn test_entry_name() {
        let store = ArchiveStore::from_reader(build_archive(&[]), base()).unwrap();

        assert_eq!(
            store.entry_name("https://book/OEBPS/images/cover.jpg").unwrap(),
            "OEBPS/images/cover.jpg"
        );
        assert_eq!(
            store.entry_name("https://book/OEBPS/my%20cover.jpg#top").unwrap(),
            "OEBPS/my cover.jpg"
        );

        let result = store.entry_name("https://elsewhere/OEBPS/cover.jpg");
        assert_eq!(
            result.unwrap_err(),
            EpubError::RelativeLinkLeakage {
                path: "https://elsewhere/OEBPS/cover.jpg".to_string()
            }
        );
        assert!(store.entry_name("https://book/").is_err());
    }

    /// Missing entries are empty resources, not errors
    #[tokio::test]
    async fn test_get_book_data() {
        let archive = build_archive(&[("OEBPS/images/cover.jpg", b"jpeg bytes")]);
        let store = ArchiveStore::from_reader(archive, base()).unwrap();

        let found = store
            .get_book_data("https://book/OEBPS/images/cover.jpg")
            .await
            .unwrap();
        assert_eq!(found.data.as_deref(), Some(&b"jpeg bytes"[..]));

        let missing = store
            .get_book_data("https://book/OEBPS/images/back.jpg")
            .await
            .unwrap();
        assert!(missing.data.is_none());
    }

    #[tokio::test]
    async fn test_fetch_manifest_text() {
        let archive = build_archive(&[("META-INF/encryption.xml", ENCRYPTION.as_bytes())]);
        let store = ArchiveStore::from_reader(archive, base()).unwrap();
        assert!(store.has_encryption().unwrap());

        let url = store.encryption_url().unwrap();
        assert_eq!(url.as_str(), "https://book/META-INF/encryption.xml");
        assert_eq!(store.fetch_text(&url).await.unwrap(), ENCRYPTION);

        let missing = Url::parse("https://book/META-INF/rights.xml").unwrap();
        assert_eq!(
            store.fetch_text(&missing).await.unwrap_err(),
            EpubError::ResourceNotFound {
                resource: "META-INF/rights.xml".to_string()
            }
        );
    }

    #[test]
    fn test_not_a_container() {
        let result = ArchiveStore::from_reader(Cursor::new(b"not a zip".to_vec()), base());
        assert!(matches!(result, Err(EpubError::ArchiveError { .. })));
    }

    /// Manifest loaded from the container, stored payloads embedded into a chapter
    #[tokio::test]
    async fn test_container_end_to_end() {
        let archive = build_archive(&[
            ("META-INF/encryption.xml", ENCRYPTION.as_bytes()),
            ("OEBPS/images/cover.jpg", b"jpeg bytes"),
            ("OEBPS/styles/book.css", b"body { margin: 0 }"),
        ]);
        let store = ArchiveStore::from_reader(archive, base()).unwrap();
        let cache = MemoryStore::new();

        let manifest = EncryptionManifest::load(
            store.encryption_url().unwrap(),
            &store,
            &LoadOptions::new().with_cache(&cache),
        )
        .await
        .unwrap();
        assert_eq!(manifest.resources(), ["OEBPS/images/cover.jpg"]);
        assert!(manifest.is_encrypted("https://book/OEBPS/images/cover.jpg"));

        let registry = HandleRegistry::new();
        let embedder = AssetEmbedder::new(&store, &registry)
            .with_config(EmbedConfig::new().with_manifest(&manifest));
        let chapter = Url::parse("https://book/OEBPS/text/chapter1.xhtml").unwrap();
        let result = embedder
            .embed_all(
                r#"<link href="../styles/book.css" rel="stylesheet"/><img src="../images/cover.jpg"/>"#,
                &chapter,
            )
            .await
            .unwrap();

        assert_eq!(result.handles.len(), 2);
        assert!(!result.markup.contains("../"));
        assert_eq!(
            registry.resolve(result.handles[1].url()).unwrap().as_deref(),
            Some(&b"body { margin: 0 }"[..])
        );
    }
}
