use std::convert::TryFrom;
use std::env;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use flowview_core::{
    DocumentEngine, DocumentHandle, DocumentMetadata, DocumentSource, FindOptions, LoadRequest,
    OpenError, PageRect, PageSize, SearchQuery, TextMatch,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

const LIBRARY_PATH_ENV: &str = "FLOWVIEW_PDFIUM_LIBRARY_PATH";

/// Opens PDF documents through a shared pdfium binding.
pub struct PdfiumEngine {
    pdfium: Arc<Pdfium>,
    asset_root: Option<PathBuf>,
}

impl PdfiumEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pdfium: Arc::new(bind_pdfium()?),
            asset_root: None,
        })
    }

    /// Directory that `asset://` sources are resolved against.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }
}

#[async_trait]
impl DocumentEngine for PdfiumEngine {
    #[instrument(skip(self, request), fields(source = %request.source))]
    async fn open(&self, request: &LoadRequest) -> Result<Box<dyn DocumentHandle>, OpenError> {
        let pdfium = Arc::clone(&self.pdfium);
        let source = request.source.clone();
        let asset_root = self.asset_root.clone();
        let password = request.password.clone();

        let document = tokio::task::spawn_blocking(move || {
            let payload = resolve(&source, asset_root.as_deref())?;
            PdfiumDocument::open(pdfium, payload, password.as_deref())
        })
        .await
        .map_err(|err| OpenError::Engine(format!("open worker failed: {err}")))??;

        debug!(pages = document.page_count, "pdf opened");
        Ok(Box::new(document))
    }
}

#[derive(Debug, PartialEq)]
enum Payload {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

fn resolve(source: &DocumentSource, asset_root: Option<&Path>) -> Result<Payload, OpenError> {
    match source {
        DocumentSource::File(path) => Ok(Payload::Path(path.clone())),
        DocumentSource::Bytes(data) => Ok(Payload::Bytes(data.to_vec())),
        DocumentSource::Asset(name) => {
            let root = asset_root.ok_or_else(|| {
                OpenError::Unsupported(format!("no asset directory configured for {name:?}"))
            })?;
            if Path::new(name)
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
            {
                return Err(OpenError::Unsupported(format!("invalid asset name {name:?}")));
            }
            Ok(Payload::Path(root.join(name)))
        }
        DocumentSource::Uri(url) if source.is_remote() => fetch(url.as_str()).map(Payload::Bytes),
        DocumentSource::Uri(url) => url
            .to_file_path()
            .map(Payload::Path)
            .map_err(|_| OpenError::Unsupported(format!("cannot open {url}"))),
    }
}

fn fetch(url: &str) -> Result<Vec<u8>, OpenError> {
    debug!(url, "downloading document");
    let response = ureq::get(url)
        .call()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, format!("failed to fetch {url}: {err}")))?;
    let mut bytes = Vec::new();
    response.into_reader().read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn classify(err: PdfiumError, password: Option<&str>) -> OpenError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            if password.is_some() {
                OpenError::IncorrectPassword
            } else {
                OpenError::PasswordRequired
            }
        }
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FileError) => {
            OpenError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "document file could not be opened",
            ))
        }
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError) => {
            OpenError::Corrupt("not a readable PDF".to_owned())
        }
        other => OpenError::Engine(other.to_string()),
    }
}

struct PdfiumDocument {
    page_count: usize,
    metadata: DocumentMetadata,
    document: Mutex<Option<PdfDocument<'static>>>,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn open(pdfium: Arc<Pdfium>, payload: Payload, password: Option<&str>) -> Result<Self, OpenError> {
        let document = match payload {
            Payload::Path(path) => pdfium.load_pdf_from_file(&path, password),
            Payload::Bytes(bytes) => pdfium.load_pdf_from_byte_vec(bytes, password),
        }
        .map_err(|err| classify(err, password))?;
        // SAFETY: the returned PdfDocument borrows the bindings owned by `pdfium`. The document
        // lives in `self.document`, which is declared before `self._pdfium` and therefore dropped
        // first, and `close` drops it explicitly while the bindings are still alive.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
        let metadata = read_metadata(&document);
        Ok(Self {
            page_count,
            metadata,
            document: Mutex::new(Some(document)),
            _pdfium: pdfium,
        })
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let guard = self.document.lock();
        let document = guard
            .as_ref()
            .ok_or_else(|| anyhow!("document has been closed"))?;
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index))?;
        f(&page)
    }
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let tag = |kind| {
        metadata
            .get(kind)
            .map(|t| t.value().trim().to_owned())
            .filter(|value| !value.is_empty())
    };
    DocumentMetadata {
        title: tag(PdfDocumentMetadataTagType::Title),
        author: tag(PdfDocumentMetadataTagType::Author),
        subject: tag(PdfDocumentMetadataTagType::Subject),
    }
}

impl DocumentHandle for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn metadata(&self) -> DocumentMetadata {
        self.metadata.clone()
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize> {
        self.with_page(page_index, |page| {
            Ok(PageSize {
                width: page.width().value,
                height: page.height().value,
            })
        })
    }

    #[instrument(skip(self, query), fields(query = query.text()))]
    fn find_on_page(
        &self,
        page_index: usize,
        query: &SearchQuery,
        options: FindOptions,
    ) -> Result<Vec<TextMatch>> {
        self.with_page(page_index, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;

            let search_options = PdfSearchOptions::new()
                .match_case(options.match_case)
                .match_whole_word(options.whole_word);
            let search = text
                .search(query.text(), &search_options)
                .with_context(|| format!("failed to perform search on page {}", page_index))?;

            let page_height = page.height().value;
            let mut matches = Vec::new();
            while let Some(segments) = search.find_next() {
                let mut rects = Vec::new();
                let mut parts = Vec::new();
                for segment in segments.iter() {
                    let bounds = segment.bounds();
                    let left = bounds.left().value;
                    let right = bounds.right().value;
                    let top = bounds.top().value;
                    let bottom = bounds.bottom().value;
                    if right <= left || top <= bottom {
                        warn!(page = page_index, "skipping degenerate match segment");
                        continue;
                    }
                    rects.push(PageRect::new(left, page_height - top, right - left, top - bottom));
                    parts.push(segment.text());
                }
                if rects.is_empty() {
                    continue;
                }
                matches.push(TextMatch {
                    offset: matches.len(),
                    text: parts.join(" "),
                    rects,
                });
            }

            Ok(matches)
        })
    }

    fn close(self: Box<Self>) {
        self.document.lock().take();
    }
}

/// Library locations to try, most specific first.
fn library_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = env::var_os(LIBRARY_PATH_ENV).filter(|path| !path.is_empty()) {
        candidates.push(PathBuf::from(path));
    }
    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        candidates.push(Pdfium::pdfium_platform_library_name_at_path(&dir));
    }
    candidates.push(Pdfium::pdfium_platform_library_name_at_path("./"));
    candidates
}

fn bind_pdfium() -> Result<Pdfium> {
    let mut tried = Vec::new();
    for path in library_candidates() {
        match Pdfium::bind_to_library(&path) {
            Ok(bindings) => {
                debug!(path = %path.display(), "bound pdfium");
                return Ok(Pdfium::new(bindings));
            }
            Err(err) => tried.push(format!("{}: {}", path.display(), err)),
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|err| {
        tried.push(format!("system: {err}"));
        anyhow!(
            "no usable pdfium library; set {} to its path (tried {})",
            LIBRARY_PATH_ENV,
            tried.join(", ")
        )
    })?;
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_errors_depend_on_whether_one_was_given() {
        let locked = || PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError);
        assert!(matches!(classify(locked(), None), OpenError::PasswordRequired));
        assert!(matches!(
            classify(locked(), Some("guess")),
            OpenError::IncorrectPassword
        ));
    }

    #[test]
    fn file_and_format_errors_are_open_failures() {
        let missing = classify(
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FileError),
            None,
        );
        assert!(matches!(missing, OpenError::Io(_)));
        let corrupt = classify(
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError),
            None,
        );
        assert!(matches!(corrupt, OpenError::Corrupt(_)));
        assert!(!corrupt.is_password_failure());
    }

    #[test]
    fn assets_resolve_under_the_root() {
        let root = Path::new("/srv/docs");
        let payload = resolve(&DocumentSource::asset("guide.pdf"), Some(root)).unwrap();
        assert_eq!(payload, Payload::Path(root.join("guide.pdf")));

        assert!(matches!(
            resolve(&DocumentSource::asset("../etc/passwd"), Some(root)),
            Err(OpenError::Unsupported(_))
        ));
        assert!(matches!(
            resolve(&DocumentSource::asset("guide.pdf"), None),
            Err(OpenError::Unsupported(_))
        ));
    }

    #[test]
    fn bytes_and_files_pass_through() {
        let payload = resolve(&DocumentSource::bytes(vec![1u8, 2, 3]), None).unwrap();
        assert_eq!(payload, Payload::Bytes(vec![1, 2, 3]));

        let payload = resolve(&DocumentSource::file("/tmp/a.pdf"), None).unwrap();
        assert_eq!(payload, Payload::Path(PathBuf::from("/tmp/a.pdf")));
    }
}
