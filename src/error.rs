//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while loading
//! an encryption manifest and embedding the resources referenced by a content
//! document. All errors are uniformly wrapped in the `EpubError` enumeration
//! for convenient error handling by the caller.
//!
//! ## Pipeline Errors
//!
//! - [EpubError::ManifestUnavailable] - the manifest could not be fetched or parsed
//! - [EpubError::ManifestMalformed] - the manifest lacks an expected element or attribute
//! - [EpubError::ResourceUnavailable] - the store has no payload for a referenced resource
//! - [EpubError::DecryptionFailure] - the decryptor rejected a resource
//!
//! None of them are retried internally; the embedding pass stops at the first one.

use thiserror::Error;

/// Types of errors that can occur while resolving and embedding EPUB resources
#[derive(Debug, Error)]
pub enum EpubError {
    /// ZIP archive related errors
    ///
    /// Errors occur when processing the ZIP structure of EPUB files,
    /// such as file corruption, unreadability, etc.
    #[cfg(feature = "archive")]
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Decryption failure error
    ///
    /// The decryptor rejected the bytes of an encrypted resource.
    #[error("Decryption failure: Unable to decrypt \"{resource}\": {reason}")]
    DecryptionFailure { resource: String, reason: String },

    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode an empty stream.
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    /// XML parsing failure error
    ///
    /// The reader reached the end of the input without finding a document element.
    #[error("Failed parsing XML error: The document does not contain a root element.")]
    FailedParsingXml,

    /// HTTP transport error
    #[cfg(feature = "http")]
    #[error("HTTP error: {source}")]
    HttpError { source: reqwest::Error },

    /// URL parsing or joining error
    #[error("Invalid URL: {source}")]
    InvalidUrl { source: url::ParseError },

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// JSON serialization error
    ///
    /// Raised when the transport form of a manifest tree cannot be
    /// written or read back.
    #[error("JSON error: {source}")]
    JsonError { source: serde_json::Error },

    /// Malformed manifest error
    ///
    /// The manifest tree does not contain the element or attribute at `path`,
    /// so the encrypted resource list cannot be extracted.
    #[error("Malformed manifest: Expected \"{path}\" in the encryption manifest.")]
    ManifestMalformed { path: String },

    /// Unavailable manifest error
    ///
    /// The manifest at `url` could not be fetched, decoded or parsed.
    /// `source` is the fetcher or parser error behind it.
    #[error("Manifest unavailable: Unable to load \"{url}\": {source}")]
    ManifestUnavailable {
        url: String,
        source: Box<EpubError>,
    },

    /// Mutex error
    ///
    /// This error occurs when a mutex is poisoned, which means
    /// that a thread has panicked while holding a lock on the mutex.
    #[error("Mutex error: Mutex was poisoned.")]
    MutexError,

    /// Relative link leak error
    ///
    /// This error occurs when a resource identifier points outside the scope
    /// of an EPUB container.
    #[error("Relative link leakage: Path \"{path}\" is out of container range.")]
    RelativeLinkLeakage { path: String },

    /// Unable to find the resource error
    ///
    /// This error occurs when an attempt is made to get a resource
    /// but it does not exist in the EPUB container.
    #[error("Resource not found: Unable to find resource from \"{resource}\".")]
    ResourceNotFound { resource: String },

    /// Unavailable resource error
    ///
    /// The store answered for `resource` but carried no payload, and
    /// no decryption path applied.
    #[error("Resource unavailable: The resource \"{resource}\" has no data.")]
    ResourceUnavailable { resource: String },

    /// Unusable compression method error
    ///
    /// This error occurs when an EPUB file uses an unsupported compression method.
    #[error(
        "Unusable compression method: The \"{file}\" file uses the unsupported \"{method}\" compression method."
    )]
    UnusableCompressionMethod { file: String, method: String },

    /// UTF-8 decoding error
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// QuickXml error
    ///
    /// This error occurs when parsing XML data using the QuickXml library.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },
}

#[cfg(feature = "archive")]
impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::ArchiveError { source: value }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for EpubError {
    fn from(value: reqwest::Error) -> Self {
        EpubError::HttpError { source: value }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::QuickXmlError { source: value }
    }
}

impl From<quick_xml::escape::EscapeError> for EpubError {
    fn from(value: quick_xml::escape::EscapeError) -> Self {
        EpubError::QuickXmlError {
            source: quick_xml::Error::Escape(value),
        }
    }
}

impl From<url::ParseError> for EpubError {
    fn from(value: url::ParseError) -> Self {
        EpubError::InvalidUrl { source: value }
    }
}

impl From<serde_json::Error> for EpubError {
    fn from(value: serde_json::Error) -> Self {
        EpubError::JsonError { source: value }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::IOError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Utf16DecodeError { source: value }
    }
}

impl<T> From<std::sync::PoisonError<T>> for EpubError {
    fn from(_value: std::sync::PoisonError<T>) -> Self {
        EpubError::MutexError
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::DecryptionFailure {
                    resource: l_resource,
                    reason: l_reason,
                },
                Self::DecryptionFailure {
                    resource: r_resource,
                    reason: r_reason,
                },
            ) => l_resource == r_resource && l_reason == r_reason,
            (Self::ManifestMalformed { path: l_path }, Self::ManifestMalformed { path: r_path }) => {
                l_path == r_path
            }
            (
                Self::ManifestUnavailable {
                    url: l_url,
                    source: l_source,
                },
                Self::ManifestUnavailable {
                    url: r_url,
                    source: r_source,
                },
            ) => l_url == r_url && l_source == r_source,
            (
                Self::RelativeLinkLeakage { path: l_path },
                Self::RelativeLinkLeakage { path: r_path },
            ) => l_path == r_path,
            (
                Self::ResourceNotFound {
                    resource: l_resource,
                },
                Self::ResourceNotFound {
                    resource: r_resource,
                },
            ) => l_resource == r_resource,
            (
                Self::ResourceUnavailable {
                    resource: l_resource,
                },
                Self::ResourceUnavailable {
                    resource: r_resource,
                },
            ) => l_resource == r_resource,
            (
                Self::UnusableCompressionMethod {
                    file: l_file,
                    method: l_method,
                },
                Self::UnusableCompressionMethod {
                    file: r_file,
                    method: r_method,
                },
            ) => l_file == r_file && l_method == r_method,
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}
