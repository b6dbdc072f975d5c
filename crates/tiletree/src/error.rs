//! Error types for the tiletree crate.

use std::fmt;

/// Result type for tiletree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tiletree operations.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// No content type is registered for a payload's magic.
    UnknownContentType {
        /// The URL the payload came from.
        url: String,
        /// The sniffed magic string.
        magic: String,
    },
    /// Tile content bytes were recognized but failed to parse.
    ContentParse {
        /// The URL the payload came from.
        url: String,
        /// The error message.
        message: String,
    },
    /// A tileset manifest failed to parse.
    ManifestParse {
        /// The URL of the manifest.
        url: String,
        /// The error message.
        message: String,
    },
    /// The asset endpoint response was missing or malformed.
    AssetEndpoint {
        /// The endpoint URL.
        url: String,
        /// Description of what was wrong.
        detail: String,
    },
    /// Renderer resource preparation failed.
    PrepareFailed {
        /// The error message.
        message: String,
    },
    /// Cache operation failed.
    Cache {
        /// The operation that failed.
        operation: &'static str,
        /// The error message.
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::UnknownContentType { url, magic } => {
                write!(f, "no content type registered for magic {magic:?} from {url}")
            }
            Error::ContentParse { url, message } => {
                write!(f, "failed to parse tile content from {url}: {message}")
            }
            Error::ManifestParse { url, message } => {
                write!(f, "failed to parse tileset manifest from {url}: {message}")
            }
            Error::AssetEndpoint { url, detail } => {
                write!(f, "asset endpoint {url} returned invalid response: {detail}")
            }
            Error::PrepareFailed { message } => {
                write!(f, "renderer resource preparation failed: {message}")
            }
            Error::Cache { operation, message } => {
                write!(f, "cache {operation} failed: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}
