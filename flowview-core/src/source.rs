use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub type SourceId = Uuid;

static SOURCE_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f6d2a9e-41c8-5b07-9e15-c2d84a7b6f03").expect("valid namespace UUID")
});

/// Where a document comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum DocumentSource {
    File(PathBuf),
    Uri(Url),
    Bytes(Arc<[u8]>),
    /// A document bundled with the host, resolved by the engine.
    Asset(String),
}

impl DocumentSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn asset(name: impl Into<String>) -> Self {
        Self::Asset(name.into())
    }

    /// Stable identity of the source, used to correlate log lines across reloads.
    pub fn id(&self) -> SourceId {
        match self {
            Self::File(path) => {
                let resolved = resolve_path(path);
                Uuid::new_v5(&SOURCE_NAMESPACE, resolved.to_string_lossy().as_bytes())
            }
            Self::Uri(url) => Uuid::new_v5(&SOURCE_NAMESPACE, url.as_str().as_bytes()),
            Self::Bytes(data) => Uuid::new_v5(&SOURCE_NAMESPACE, data),
            Self::Asset(name) => {
                Uuid::new_v5(&SOURCE_NAMESPACE, format!("asset://{name}").as_bytes())
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Uri(url) if matches!(url.scheme(), "http" | "https"))
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf())
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Uri(url) => f.debug_tuple("Uri").field(&url.as_str()).finish(),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            Self::Asset(name) => f.debug_tuple("Asset").field(name).finish(),
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Uri(url) => write!(f, "{url}"),
            Self::Bytes(data) => write!(f, "<{} bytes>", data.len()),
            Self::Asset(name) => write!(f, "asset://{name}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceParseError {
    #[error("document source is empty")]
    Empty,
    #[error("invalid document URI {input:?}: {source}")]
    InvalidUri {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("file URI {0:?} does not name a local path")]
    NotALocalPath(String),
}

/// Parses `http(s)://` as a remote URI, `asset://name` and bare names without
/// path separators as assets, `file://` URIs and everything else as files.
impl FromStr for DocumentSource {
    type Err = SourceParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SourceParseError::Empty);
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|source| SourceParseError::InvalidUri {
                input: trimmed.to_owned(),
                source,
            })?;
            return Ok(Self::Uri(url));
        }

        if lower.starts_with("asset://") {
            return Ok(Self::Asset(trimmed["asset://".len()..].to_owned()));
        }

        if lower.starts_with("file://") {
            let url = Url::parse(trimmed).map_err(|source| SourceParseError::InvalidUri {
                input: trimmed.to_owned(),
                source,
            })?;
            let path = url
                .to_file_path()
                .map_err(|_| SourceParseError::NotALocalPath(trimmed.to_owned()))?;
            return Ok(Self::File(path));
        }

        let path = Path::new(trimmed);
        let has_separator = trimmed.contains('/') || trimmed.contains(std::path::MAIN_SEPARATOR);
        if !path.is_absolute() && !has_separator {
            return Ok(Self::Asset(trimmed.to_owned()));
        }

        Ok(Self::File(path.to_path_buf()))
    }
}

/// One reload attempt's parameters.
#[derive(Clone, PartialEq)]
pub struct LoadRequest {
    pub source: DocumentSource,
    pub password: Option<String>,
    pub restore_page: Option<usize>,
}

impl LoadRequest {
    pub fn new(source: DocumentSource) -> Self {
        Self {
            source,
            password: None,
            restore_page: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_restore_page(mut self, page: usize) -> Self {
        self.restore_page = Some(page);
        self
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("source", &self.source)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("restore_page", &self.restore_page)
            .finish()
    }
}
