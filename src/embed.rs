//! Asset embedding
//!
//! [AssetEmbedder] rewrites the image and stylesheet references of a content
//! document so that they point at local handles instead of relative paths.
//! Each pass works in three steps:
//!
//! 1. all references are collected from the markup as it was when the pass
//!    started ([find_references]);
//! 2. each reference, in document order, is fetched from the store, decrypted
//!    when the manifest lists it, and registered as a local handle;
//! 3. the markup is rebuilt once with every reference replaced.
//!
//! Absolute `http://` and `https://` references are left alone, and so are
//! references that have already been rewritten, so running a pass over its
//! own output changes nothing.

use std::{collections::HashMap, sync::LazyLock};

use log::{debug, warn};
use regex::Regex;
use url::Url;

use crate::{
    encryption::EncryptionManifest,
    error::EpubError,
    store::{Decryptor, HandleRegistry, ResourceStore},
    types::{AssetKind, LocalHandle, ResourceReference},
};

// Both patterns stand for `(src="|href=")(?!https?://)\/?...`; the look-ahead
// is applied by `find_references`.

/// Matches image references in `src` or `href` attributes
static IMAGE_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(src="|href=")/?([^"]+\.(jpe?g|png|gif|bmp)")"#).unwrap()
});

/// Matches stylesheet references in `href` attributes
static STYLESHEET_REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(href=")/?([^"]+\.(css))""#).unwrap());

impl AssetKind {
    fn pattern(&self) -> &'static Regex {
        match self {
            AssetKind::Image => &IMAGE_REFERENCE_RE,
            AssetKind::Stylesheet => &STYLESHEET_REFERENCE_RE,
        }
    }
}

/// How a pass treats several references to the same resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepeatPolicy {
    /// Every reference is retrieved, decrypted and registered on its own
    #[default]
    Independent,

    /// References resolving to the same identifier share one retrieval and one handle
    Reuse,
}

/// Configuration of an [AssetEmbedder]
///
/// | manifest | decryptor | behavior                                                  |
/// |----------|-----------|-----------------------------------------------------------|
/// | yes      | yes       | resources listed by the manifest are decrypted            |
/// | yes      | no        | everything embedded as stored; listed resources warned on |
/// | no       | yes       | everything embedded as stored; decryptor never called     |
/// | no       | no        | everything embedded as stored                             |
#[derive(Clone, Copy, Default)]
pub struct EmbedConfig<'a> {
    pub manifest: Option<&'a EncryptionManifest>,
    pub decryptor: Option<&'a dyn Decryptor>,
    pub repeats: RepeatPolicy,
}

impl<'a> EmbedConfig<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(mut self, manifest: &'a EncryptionManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_decryptor(mut self, decryptor: &'a dyn Decryptor) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn with_repeat_policy(mut self, repeats: RepeatPolicy) -> Self {
        self.repeats = repeats;
        self
    }

    /// The manifest and decryptor pair, when decryption is possible at all
    pub fn decryption(&self) -> Option<(&'a EncryptionManifest, &'a dyn Decryptor)> {
        match (self.manifest, self.decryptor) {
            (Some(manifest), Some(decryptor)) => Some((manifest, decryptor)),
            _ => None,
        }
    }
}

/// Markup produced by an embedding pass
///
/// `handles` lists every handle substituted into `markup`. They stay
/// registered until the caller revokes them, typically once the markup has
/// been rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedMarkup {
    pub markup: String,
    pub handles: Vec<LocalHandle>,
}

impl EmbeddedMarkup {
    pub fn into_markup(self) -> String {
        self.markup
    }
}

pub struct AssetEmbedder<'a> {
    store: &'a dyn ResourceStore,
    registry: &'a HandleRegistry,
    config: EmbedConfig<'a>,
}

impl<'a> AssetEmbedder<'a> {
    pub fn new(store: &'a dyn ResourceStore, registry: &'a HandleRegistry) -> Self {
        Self {
            store,
            registry,
            config: EmbedConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EmbedConfig<'a>) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EmbedConfig<'a> {
        &self.config
    }

    /// Replaces the image references of `markup`
    ///
    /// `base_url` is the absolute location of the document the markup comes
    /// from; relative references are resolved against it.
    pub async fn embed_images(
        &self,
        markup: &str,
        base_url: &Url,
    ) -> Result<EmbeddedMarkup, EpubError> {
        self.embed(markup, base_url, AssetKind::Image).await
    }

    /// Replaces the stylesheet references of `markup`, keeping the `href` attribute
    pub async fn embed_styles(
        &self,
        markup: &str,
        base_url: &Url,
    ) -> Result<EmbeddedMarkup, EpubError> {
        self.embed(markup, base_url, AssetKind::Stylesheet).await
    }

    /// Runs the image pass, then the stylesheet pass over its output
    pub async fn embed_all(
        &self,
        markup: &str,
        base_url: &Url,
    ) -> Result<EmbeddedMarkup, EpubError> {
        let images = self.embed_images(markup, base_url).await?;
        match self.embed_styles(&images.markup, base_url).await {
            Ok(styles) => {
                let mut handles = images.handles;
                handles.extend(styles.handles);
                Ok(EmbeddedMarkup {
                    markup: styles.markup,
                    handles,
                })
            }
            Err(err) => {
                self.release(&images.handles);
                Err(err)
            }
        }
    }

    async fn embed(
        &self,
        markup: &str,
        base_url: &Url,
        kind: AssetKind,
    ) -> Result<EmbeddedMarkup, EpubError> {
        let references = find_references(markup, base_url, kind)?;
        debug!(
            "Found {} {:?} references in {}",
            references.len(),
            kind,
            base_url
        );

        let mut handles = Vec::<LocalHandle>::new();
        let mut reusable = HashMap::<String, LocalHandle>::new();
        let mut replacements = Vec::with_capacity(references.len());

        for reference in &references {
            let identifier = reference.url.as_str();
            let reused = match self.config.repeats {
                RepeatPolicy::Reuse => reusable.get(identifier).cloned(),
                RepeatPolicy::Independent => None,
            };

            let handle = match reused {
                Some(handle) => handle,
                None => match self.resolve(identifier).await {
                    Ok(handle) => {
                        handles.push(handle.clone());
                        if self.config.repeats == RepeatPolicy::Reuse {
                            reusable.insert(identifier.to_string(), handle.clone());
                        }
                        handle
                    }
                    Err(err) => {
                        self.release(&handles);
                        return Err(err);
                    }
                },
            };

            replacements.push(format!("{}=\"{}\"", reference.attribute, handle.url()));
        }

        Ok(EmbeddedMarkup {
            markup: splice(markup, &references, &replacements),
            handles,
        })
    }

    /// Retrieves one resource and registers it as a local handle
    async fn resolve(&self, identifier: &str) -> Result<LocalHandle, EpubError> {
        let resource = self.store.get_book_data(identifier).await?;
        let data = resource
            .data
            .ok_or_else(|| EpubError::ResourceUnavailable {
                resource: identifier.to_string(),
            })?;

        match self.config.decryption() {
            Some((manifest, decryptor)) if manifest.is_encrypted(identifier) => {
                debug!("Decrypting {}", identifier);
                manifest
                    .decrypt_to_handle(data, decryptor, self.registry)
                    .await
                    .map_err(|err| match err {
                        EpubError::DecryptionFailure { reason, .. } => {
                            EpubError::DecryptionFailure {
                                resource: identifier.to_string(),
                                reason,
                            }
                        }
                        other => other,
                    })
            }
            _ => {
                if self
                    .config
                    .manifest
                    .is_some_and(|manifest| manifest.is_encrypted(identifier))
                {
                    warn!(
                        "{} is listed as encrypted but no decryptor is configured, embedding it as stored",
                        identifier
                    );
                }
                self.registry.create(data)
            }
        }
    }

    fn release(&self, handles: &[LocalHandle]) {
        if let Err(err) = self.registry.revoke_all(handles) {
            warn!("Failed to release {} handles: {}", handles.len(), err);
        }
    }
}

/// Collects the references of one kind, left to right and without overlap
///
/// A candidate whose value starts with `http://` or `https://` is rejected and
/// scanning resumes one byte after its start, which selects the same matches
/// as the look-ahead form of the pattern would.
pub fn find_references(
    markup: &str,
    base_url: &Url,
    kind: AssetKind,
) -> Result<Vec<ResourceReference>, EpubError> {
    let pattern = kind.pattern();
    let mut references = Vec::new();
    let mut position = 0;

    while let Some(captures) = pattern.captures_at(markup, position) {
        let (Some(whole), Some(prefix)) = (captures.get(0), captures.get(1)) else {
            break;
        };

        if is_networked(&markup[prefix.end()..]) {
            position = whole.start() + 1;
            continue;
        }

        let raw = whole.as_str();
        let relative_path: String = raw[prefix.len()..]
            .chars()
            .filter(|ch| *ch != '"' && *ch != '\'')
            .collect();
        let url = base_url.join(&relative_path)?;

        references.push(ResourceReference {
            kind,
            raw: raw.to_string(),
            span: whole.range(),
            attribute: prefix
                .as_str()
                .trim_end_matches(|ch| ch == '=' || ch == '"')
                .to_string(),
            relative_path,
            url,
        });
        position = whole.end();
    }

    Ok(references)
}

fn is_networked(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Rebuilds `markup` with each reference span replaced by its replacement
fn splice(markup: &str, references: &[ResourceReference], replacements: &[String]) -> String {
    let mut output = String::with_capacity(markup.len());
    let mut cursor = 0;
    for (reference, replacement) in references.iter().zip(replacements) {
        output.push_str(&markup[cursor..reference.span.start]);
        output.push_str(replacement);
        cursor = reference.span.end;
    }
    output.push_str(&markup[cursor..]);
    output
}
