//! Epub embed library
//!
//! A Rust library for turning the content documents of an EPUB into markup
//! that can be rendered on its own.
//!
//! Chapters reference their images and stylesheets by paths relative to the
//! container. This library resolves those references, retrieves the resources
//! through a [ResourceStore](store::ResourceStore), decrypts the ones listed in
//! the book's encryption manifest, and rewrites the markup to point at local
//! handles kept in a [HandleRegistry](store::HandleRegistry).
//!
//! ## Features
//!
//! - Parse `META-INF/encryption.xml` into a generic tree and list its encrypted resources.
//! - Cache the parsed manifest through any key-value store.
//! - Rewrite `src`/`href` image references and `href` stylesheet references.
//! - Decrypt resources and content documents through a caller-supplied decryptor.
//!
//! ## Quick Start
//!
//! ```rust, ignore
//! # use epub_embed::{archive::ArchiveStore, embed::{AssetEmbedder, EmbedConfig}};
//! # use epub_embed::{encryption::{EncryptionManifest, LoadOptions}, store::HandleRegistry};
//! # use url::Url;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ArchiveStore::open("path/to/book.epub", Url::parse("https://book/")?)?;
//! let manifest =
//!     EncryptionManifest::load(store.encryption_url()?, &store, &LoadOptions::new()).await?;
//!
//! let registry = HandleRegistry::new();
//! let embedder = AssetEmbedder::new(&store, &registry)
//!     .with_config(EmbedConfig::new().with_manifest(&manifest));
//!
//! let chapter = Url::parse("https://book/OEBPS/chapter1.xhtml")?;
//! let embedded = embedder.embed_all("<img src=\"cover.jpg\"/>", &chapter).await?;
//! println!("{}", embedded.markup);
//!
//! registry.revoke_all(&embedded.handles)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `archive` (default): Enable `epub_embed::archive`, which reads resources and
//!   the encryption manifest straight from an EPUB container.
//! - `http`: Enable `epub_embed::http`, which fetches the encryption manifest over HTTP.

pub mod utils;

#[cfg(feature = "archive")]
pub mod archive;
pub mod embed;
pub mod encryption;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod store;
pub mod tree;
pub mod types;

pub use utils::DecodeBytes;
