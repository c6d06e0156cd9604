//! Replay source reading exported metrics from disk.
//!
//! Reads newline-delimited JSON exports, one file per source type
//! (`search_performance.jsonl`, ...), each line a [`FactRow`]. Used by the
//! CLI to drive the pipeline from an export directory, and useful for
//! re-ingesting historical dumps.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::facts::FactRow;

use super::{FetchPage, FetchRequest, MetricsSource, SourceError};

/// Default rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// A [`MetricsSource`] replaying JSONL exports from a directory.
#[derive(Debug)]
pub struct ReplaySource {
    dir: PathBuf,
    page_size: usize,
}

impl ReplaySource {
    /// Creates a replay source over the given export directory.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Overrides the page size (mostly for tests).
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn load_matching(&self, request: &FetchRequest) -> Result<Vec<FactRow>, SourceError> {
        let path = self.dir.join(format!("{}.jsonl", request.source));
        if !path.exists() {
            // No export for this source: nothing to ingest.
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| SourceError::Transient {
            message: format!("failed to read {}: {e}", path.display()),
        })?;

        let mut rows = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row: FactRow = serde_json::from_str(line).map_err(|e| SourceError::Permanent {
                message: format!("bad export row at {}:{}: {e}", path.display(), index + 1),
            })?;
            if row.key.property == request.property && row.key.date == request.date {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl MetricsSource for ReplaySource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchPage, SourceError> {
        let all = self.load_matching(request)?;

        let offset: usize = match &request.page_token {
            Some(token) => token.parse().map_err(|_| SourceError::Permanent {
                message: format!("invalid page token '{token}'"),
            })?,
            None => 0,
        };

        let page: Vec<FactRow> = all.iter().skip(offset).take(self.page_size).cloned().collect();
        let next_offset = offset + page.len();
        let next_page = (next_offset < all.len()).then(|| next_offset.to_string());

        Ok(FetchPage {
            rows: page,
            next_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactKey, Measures};
    use chrono::NaiveDate;
    use siphon_core::{PropertyKey, SourceType};
    use std::io::Write as _;

    fn row(day: u32, query: &str) -> FactRow {
        FactRow {
            key: FactKey::new(
                NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                PropertyKey::new_unchecked("https://example.com/"),
                vec![("query".into(), query.into())],
            ),
            source: SourceType::SearchPerformance,
            measures: Measures::default(),
        }
    }

    fn write_export(dir: &Path, rows: &[FactRow]) {
        let mut file =
            std::fs::File::create(dir.join("search_performance.jsonl")).unwrap();
        for row in rows {
            writeln!(file, "{}", serde_json::to_string(row).unwrap()).unwrap();
        }
    }

    fn request(day: u32) -> FetchRequest {
        FetchRequest::new(
            PropertyKey::new_unchecked("https://example.com/"),
            SourceType::SearchPerformance,
            NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        )
    }

    #[tokio::test]
    async fn filters_by_property_and_date() {
        let dir = tempfile::tempdir().unwrap();
        write_export(dir.path(), &[row(1, "rust"), row(2, "tokio")]);

        let source = ReplaySource::new(dir.path());
        let page = source.fetch(&request(1)).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert!(page.next_page.is_none());
    }

    #[tokio::test]
    async fn paginates_with_offset_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write_export(
            dir.path(),
            &[row(1, "a"), row(1, "b"), row(1, "c")],
        );

        let source = ReplaySource::new(dir.path()).with_page_size(2);
        let first = source.fetch(&request(1)).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        let token = first.next_page.unwrap();

        let second = source.fetch(&request(1).next_page(token)).await.unwrap();
        assert_eq!(second.rows.len(), 1);
        assert!(second.next_page.is_none());
    }

    #[tokio::test]
    async fn missing_export_is_empty_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ReplaySource::new(dir.path());
        let page = source.fetch(&request(1)).await.unwrap();
        assert!(page.rows.is_empty());
    }

    #[tokio::test]
    async fn corrupt_export_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("search_performance.jsonl"),
            "not json\n",
        )
        .unwrap();

        let source = ReplaySource::new(dir.path());
        let err = source.fetch(&request(1)).await.unwrap_err();
        assert!(matches!(err, SourceError::Permanent { .. }));
    }
}
