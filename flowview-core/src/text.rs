//! Plain-text documents and word-tokenized matching.
//!
//! Pages are separated by form feeds. Words get a synthetic monospace layout
//! on a letter-sized page so matches carry real page-space bounds.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::document::{
    DocumentEngine, DocumentHandle, DocumentMetadata, FindOptions, OpenError, PageRect, PageSize,
    SearchQuery, TextMatch,
};
use crate::source::{DocumentSource, LoadRequest};

const PAGE_BREAK: char = '\x0c';
const MARGIN: f32 = 36.0;
const CHAR_WIDTH: f32 = 6.0;
const LINE_HEIGHT: f32 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PageWord {
    pub text: String,
    pub bounds: PageRect,
}

/// Finds `query` among a page's words in reading order.
///
/// Single-token queries match a word by substring, or by equality when
/// `whole_word` is set. Multi-token queries match only runs of consecutive
/// words equal to the tokens in order; matches never overlap. Words equal
/// a token verbatim, or once edge punctuation is trimmed from both.
pub fn find_in_words(words: &[PageWord], query: &SearchQuery, options: FindOptions) -> Vec<TextMatch> {
    let tokens = query.tokens();
    let mut matches = Vec::new();

    if query.is_phrase() {
        let mut start = 0;
        while start + tokens.len() <= words.len() {
            let window = &words[start..start + tokens.len()];
            let matched = window
                .iter()
                .zip(tokens)
                .all(|(word, token)| word_equals(&word.text, token, options.match_case));
            if !matched {
                start += 1;
                continue;
            }

            matches.push(TextMatch {
                offset: start,
                text: window
                    .iter()
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
                rects: window.iter().map(|w| w.bounds).collect(),
            });
            start += tokens.len();
        }
        return matches;
    }

    let needle = if options.match_case {
        query.text().to_owned()
    } else {
        query.text().to_lowercase()
    };

    for (offset, word) in words.iter().enumerate() {
        let is_match = if options.whole_word {
            word_equals(&word.text, &needle, options.match_case)
        } else if options.match_case {
            word.text.contains(&needle)
        } else {
            word.text.to_lowercase().contains(&needle)
        };

        if is_match {
            matches.push(TextMatch {
                offset,
                text: word.text.clone(),
                rects: vec![word.bounds],
            });
        }
    }

    matches
}

fn word_equals(word: &str, token: &str, match_case: bool) -> bool {
    same_text(word, token, match_case)
        || same_text(trim_punctuation(word), trim_punctuation(token), match_case)
}

fn same_text(a: &str, b: &str, match_case: bool) -> bool {
    if match_case {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

fn trim_punctuation(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_ascii_punctuation())
}

fn layout_page(text: &str) -> Vec<PageWord> {
    let mut words = Vec::new();
    for (line_index, line) in text.lines().enumerate() {
        let y = MARGIN + line_index as f32 * LINE_HEIGHT;
        let mut current: Option<(usize, String)> = None;

        for (column, ch) in line.chars().enumerate() {
            if ch.is_whitespace() {
                if let Some((start, word)) = current.take() {
                    words.push(place_word(word, start, y));
                }
            } else {
                current
                    .get_or_insert_with(|| (column, String::new()))
                    .1
                    .push(ch);
            }
        }

        if let Some((start, word)) = current.take() {
            words.push(place_word(word, start, y));
        }
    }
    words
}

fn place_word(text: String, column: usize, y: f32) -> PageWord {
    let width = text.chars().count() as f32 * CHAR_WIDTH;
    PageWord {
        bounds: PageRect::new(MARGIN + column as f32 * CHAR_WIDTH, y, width, LINE_HEIGHT),
        text,
    }
}

#[derive(Debug, Clone)]
pub struct TextDocument {
    pages: Vec<Vec<PageWord>>,
    metadata: DocumentMetadata,
}

impl TextDocument {
    pub fn parse(text: &str) -> Self {
        let title = text
            .split(PAGE_BREAK)
            .flat_map(str::lines)
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_owned);

        Self {
            pages: text.split(PAGE_BREAK).map(layout_page).collect(),
            metadata: DocumentMetadata {
                title,
                ..DocumentMetadata::default()
            },
        }
    }

    pub fn words(&self, page_index: usize) -> Option<&[PageWord]> {
        self.pages.get(page_index).map(Vec::as_slice)
    }
}

impl DocumentHandle for TextDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn metadata(&self) -> DocumentMetadata {
        self.metadata.clone()
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize> {
        if page_index >= self.pages.len() {
            return Err(anyhow!("page {} out of range", page_index));
        }
        Ok(PageSize::LETTER)
    }

    fn find_on_page(
        &self,
        page_index: usize,
        query: &SearchQuery,
        options: FindOptions,
    ) -> Result<Vec<TextMatch>> {
        let words = self
            .words(page_index)
            .ok_or_else(|| anyhow!("page {} out of range", page_index))?;
        Ok(find_in_words(words, query, options))
    }

    fn close(self: Box<Self>) {}
}

/// Opens UTF-8 text from files, byte buffers and registered assets.
#[derive(Default)]
pub struct TextEngine {
    assets: RwLock<HashMap<String, Arc<str>>>,
}

impl TextEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(self, name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        self.insert_asset(name, text);
        self
    }

    pub fn insert_asset(&self, name: impl Into<String>, text: impl Into<Arc<str>>) {
        self.assets.write().insert(name.into(), text.into());
    }
}

#[async_trait]
impl DocumentEngine for TextEngine {
    async fn open(&self, request: &LoadRequest) -> Result<Box<dyn DocumentHandle>, OpenError> {
        let document = match &request.source {
            DocumentSource::File(path) => {
                let bytes = tokio::fs::read(path).await?;
                let text = String::from_utf8(bytes)
                    .map_err(|err| OpenError::Corrupt(format!("{:?}: {err}", path)))?;
                TextDocument::parse(&text)
            }
            DocumentSource::Bytes(data) => {
                let text = std::str::from_utf8(data)
                    .map_err(|err| OpenError::Corrupt(err.to_string()))?;
                TextDocument::parse(text)
            }
            DocumentSource::Asset(name) => {
                let text = self.assets.read().get(name).cloned().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("asset {name:?} not found"))
                })?;
                TextDocument::parse(&text)
            }
            DocumentSource::Uri(url) => {
                return Err(OpenError::Unsupported(format!(
                    "text engine cannot fetch {url}"
                )))
            }
        };
        Ok(Box::new(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(text: &str) -> SearchQuery {
        SearchQuery::parse(text).unwrap()
    }

    #[test]
    fn substring_search_is_case_insensitive_by_default() {
        let doc = TextDocument::parse("Subtotal and TOTAL\ntotally done");
        let found = doc
            .find_on_page(0, &query("total"), FindOptions::default())
            .unwrap();
        let offsets: Vec<_> = found.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 2, 3]);
    }

    #[test]
    fn whole_word_and_match_case_narrow_results() {
        let doc = TextDocument::parse("Subtotal and TOTAL, total");
        let whole = doc
            .find_on_page(
                0,
                &query("total"),
                FindOptions {
                    match_case: false,
                    whole_word: true,
                },
            )
            .unwrap();
        assert_eq!(whole.len(), 2);

        let exact = doc
            .find_on_page(
                0,
                &query("total"),
                FindOptions {
                    match_case: true,
                    whole_word: true,
                },
            )
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].offset, 3);
    }

    #[test]
    fn tokens_with_edge_punctuation_still_match() {
        let doc = TextDocument::parse("see the U.S. report and total, then total");
        let whole_word = FindOptions {
            match_case: false,
            whole_word: true,
        };

        let found = doc.find_on_page(0, &query("U.S."), whole_word).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 2);

        let found = doc.find_on_page(0, &query("total,"), whole_word).unwrap();
        let offsets: Vec<_> = found.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![5, 7]);

        let found = doc
            .find_on_page(0, &query("total, then"), FindOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 5);
        assert_eq!(found[0].text, "total, then");
    }

    #[test]
    fn phrase_matches_consecutive_words_and_spans_their_bounds() {
        let doc = TextDocument::parse("the grand\ntotal is grand total");
        let found = doc
            .find_on_page(0, &query("grand  total"), FindOptions::default())
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].offset, 1);
        assert_eq!(found[0].text, "grand total");
        assert_eq!(found[0].rects.len(), 2);

        let bounds = PageRect::bounding(&found[0].rects).unwrap();
        assert_eq!(bounds.y, MARGIN);
        assert_eq!(bounds.bottom(), MARGIN + 2.0 * LINE_HEIGHT);
    }

    #[test]
    fn phrase_matches_do_not_overlap() {
        let doc = TextDocument::parse("na na na na");
        let found = doc
            .find_on_page(0, &query("na na"), FindOptions::default())
            .unwrap();
        let offsets: Vec<_> = found.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 2]);
    }

    #[test]
    fn form_feed_splits_pages_and_title_comes_from_first_line() {
        let doc = TextDocument::parse("Quarterly Report\nintro\x0csecond page\x0cthird");
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.metadata().title.as_deref(), Some("Quarterly Report"));
        assert_eq!(doc.words(1).unwrap()[0].text, "second");
        assert!(doc.page_size(3).is_err());
    }

    #[test]
    fn word_geometry_follows_columns_and_lines() {
        let doc = TextDocument::parse("ab  cd\nef");
        let words = doc.words(0).unwrap();
        assert_eq!(words[1].bounds, PageRect::new(MARGIN + 4.0 * CHAR_WIDTH, MARGIN, 12.0, LINE_HEIGHT));
        assert_eq!(words[2].bounds.y, MARGIN + LINE_HEIGHT);
    }

    #[tokio::test]
    async fn engine_opens_assets_bytes_and_files() {
        let engine = TextEngine::new().with_asset("notes", "one\x0ctwo");
        let asset = engine
            .open(&LoadRequest::new(DocumentSource::asset("notes")))
            .await
            .unwrap();
        assert_eq!(asset.page_count(), 2);

        let bytes = engine
            .open(&LoadRequest::new(DocumentSource::bytes(b"a\x0cb\x0cc".to_vec())))
            .await
            .unwrap();
        assert_eq!(bytes.page_count(), 3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "hello").unwrap();
        let file = engine
            .open(&LoadRequest::new(DocumentSource::file(&path)))
            .await
            .unwrap();
        assert_eq!(file.page_count(), 1);
    }

    #[tokio::test]
    async fn engine_reports_missing_and_unsupported_sources() {
        let engine = TextEngine::new();
        let missing = engine
            .open(&LoadRequest::new(DocumentSource::asset("nope")))
            .await;
        assert!(matches!(missing, Err(OpenError::Io(_))));

        let remote = engine
            .open(&LoadRequest::new("https://example.com/a.pdf".parse().unwrap()))
            .await;
        assert!(matches!(remote, Err(OpenError::Unsupported(_))));

        let binary = engine
            .open(&LoadRequest::new(DocumentSource::bytes(vec![0xff, 0xfe])))
            .await;
        assert!(matches!(binary, Err(OpenError::Corrupt(_))));
    }
}
