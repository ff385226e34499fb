//! 📄 PageSource: one page of rows at a time, always in self-describing form.
//!
//! Cursors never see positional (`valuesArray`) rows: every fetch asks for
//! `valuesDictionary` so each row stands on its own. A page is selected either by the opaque
//! cursor the previous page handed out or by explicit page number. [`PageSelector`] makes
//! "both at once" unrepresentable here; the raw [`ResultsRequest`] still refuses it for
//! callers going through [`QueryService`] directly.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::api::{ResultFormat, ResultsRequest};
use crate::error::{QueryError, Result};
use crate::query_service::QueryService;

/// 🧭 Which page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSelector {
    /// The first page, no cursor and no page number.
    First,
    Cursor(String),
    Number(u64),
}

/// 📦 A fetched page: its rows, the cursor to the next one, and the job-wide row count.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub rows: Vec<Value>,
    pub next_cursor: Option<String>,
    pub rows_in_job: Option<u64>,
}

/// 📐 Page accounting for a finished job: pages `0..=last_page`, the last one holding
/// `remainder` rows. When `rows_in_job` divides evenly the last page is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub rows_in_job: u64,
    pub page_size: u64,
    pub last_page: u64,
    pub remainder: u64,
}

impl PageLayout {
    pub fn new(rows_in_job: u64, page_size: u64) -> Self {
        let page_size = page_size.max(1);
        Self {
            rows_in_job,
            page_size,
            last_page: rows_in_job / page_size,
            remainder: rows_in_job % page_size,
        }
    }
}

/// 📄 Fetches pages of one page size for any job, through a [`QueryService`].
#[derive(Debug, Clone)]
pub struct PageSource {
    service: QueryService,
    page_size: u32,
}

impl PageSource {
    pub fn new(service: QueryService, page_size: u32) -> Self {
        Self { service, page_size }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// 🎯 Fetch one page. `data: null` in the response is a `Parse` error, since there is
    /// nothing to iterate.
    pub async fn fetch(
        &self,
        job_id: &str,
        selector: &PageSelector,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage> {
        let mut request = ResultsRequest::new(job_id)
            .with_format(ResultFormat::ValuesDictionary)
            .with_page_size(self.page_size);
        match selector {
            PageSelector::First => {}
            PageSelector::Cursor(cursor) => request = request.with_page_cursor(cursor.clone()),
            PageSelector::Number(number) => request = request.with_page_number(*number),
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            result = self.service.get_job_results(&request) => result?,
        };
        let rows = result.page.result.data.ok_or_else(|| {
            QueryError::Parse(format!("page {selector:?} of job {job_id} has null data"))
        })?;
        trace!(job_id, ?selector, rows = rows.len(), "📄 Fetched page");
        Ok(FetchedPage {
            rows,
            next_cursor: result.page.page_cursor,
            rows_in_job: result.rows_in_job,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::QueryParams;
    use crate::transport::InMemoryQueryService;
    use serde_json::json;
    use std::sync::Arc;

    async fn source_over(fake: &InMemoryQueryService, page_size: u32) -> PageSource {
        let service = QueryService::new(Arc::new(fake.clone()), None);
        let params = QueryParams::new("SELECT 1").expect("valid");
        service.create_job(Some("j1"), Some(&params)).await.expect("created");
        PageSource::new(service, page_size)
    }

    #[test]
    fn the_one_where_1015_rows_make_ten_full_pages_and_change() {
        let layout = PageLayout::new(1015, 100);
        assert_eq!(layout.last_page, 10);
        assert_eq!(layout.remainder, 15);
        let even = PageLayout::new(1000, 100);
        assert_eq!((even.last_page, even.remainder), (10, 0));
    }

    #[tokio::test]
    async fn the_one_where_cursor_and_number_land_on_the_same_page() {
        let fake = InMemoryQueryService::new(250);
        let source = source_over(&fake, 100).await;
        let token = CancellationToken::new();

        let first = source.fetch("j1", &PageSelector::First, &token).await.expect("page 0");
        assert_eq!(first.rows_in_job, Some(250));
        let cursor = first.next_cursor.expect("more pages");
        let by_cursor = source
            .fetch("j1", &PageSelector::Cursor(cursor), &token)
            .await
            .expect("page 1");
        let by_number = source
            .fetch("j1", &PageSelector::Number(1), &token)
            .await
            .expect("page 1");
        assert_eq!(by_cursor.rows, by_number.rows);
        assert_eq!(by_cursor.rows[0], json!({"row": 100}));
    }

    #[tokio::test]
    async fn the_one_where_null_data_is_not_an_empty_page() {
        let fake = InMemoryQueryService::new(250).with_null_data_page(2);
        let source = source_over(&fake, 100).await;
        let result = source
            .fetch("j1", &PageSelector::Number(2), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(QueryError::Parse(_))));
    }

    #[tokio::test]
    async fn the_one_where_a_cancelled_token_fetches_nothing() {
        let fake = InMemoryQueryService::new(10);
        let source = source_over(&fake, 100).await;
        let token = CancellationToken::new();
        token.cancel();
        let result = source.fetch("j1", &PageSelector::First, &token).await;
        assert!(matches!(result, Err(QueryError::Cancelled)));
    }
}
