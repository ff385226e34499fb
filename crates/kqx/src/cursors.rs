//! 🧭 Cursors: the two ways to walk a session's rows.
//!
//! - [`SequentialCursor`]: one consumer, front to back, following page cursors.
//! - [`SplitCursor`]: page-number ranges that can be halved on demand, for fork/join fan-out
//!   (see [`crate::parallel`]).
//!
//! Both start the session lazily on first use, both hold one [`crate::session::ConsumerLease`]
//! and give it back exactly once, and both report their terminal error through `error()` as
//! well as through the session's `last_error()`.

pub mod sequential;
pub mod splittable;

pub use sequential::SequentialCursor;
pub use splittable::{PageRange, SplitCursor};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::query_service::QueryService;
    use crate::session::{QuerySession, SessionConfig};
    use crate::transport::InMemoryQueryService;
    use futures::StreamExt;
    use serde_json::Value;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn session_over(fake: &InMemoryQueryService, page_size: u32) -> QuerySession {
        QuerySession::new(
            "SELECT * FROM panw.traffic",
            SessionConfig {
                page_size,
                poll_delay_ms: 1,
                max_poll_attempts: 3,
                ..SessionConfig::default()
            },
            QueryService::new(Arc::new(fake.clone()), None),
            CancellationToken::new(),
        )
        .expect("valid session")
    }

    fn row_number(row: &Value) -> u64 {
        row["row"].as_u64().expect("fake rows carry their index")
    }

    async fn drain(cursor: &mut SplitCursor, seen: &mut Vec<u64>) -> u64 {
        let mut count = 0;
        while let Some(row) = cursor.next_row().await.expect("no errors expected") {
            seen.push(row_number(&row));
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn the_one_where_the_sequential_cursor_reads_everything_once() {
        let fake = InMemoryQueryService::new(1015);
        let session = session_over(&fake, 100);
        let mut cursor = session.cursor().await;

        let mut seen = Vec::new();
        while let Some(row) = cursor.next_row().await.expect("rows") {
            seen.push(row_number(&row));
        }
        assert_eq!(seen, (0..1015).collect::<Vec<_>>());
        assert!(cursor.is_finished());
        assert!(!cursor.has_next().await);
        assert_eq!(fake.calls().deletes, 1);
        assert_eq!(fake.calls().creates, 1);
    }

    #[tokio::test]
    async fn the_one_where_an_empty_job_still_gets_deleted() {
        let fake = InMemoryQueryService::new(0);
        let session = session_over(&fake, 100);
        let mut cursor = session.cursor().await;
        assert!(!cursor.has_next().await);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_broken_page_ends_the_cursor_and_releases_it() {
        let fake = InMemoryQueryService::new(300).with_failing_page(1);
        let session = session_over(&fake, 100);
        let mut cursor = session.cursor().await;

        let mut rows = 0;
        let err = loop {
            match cursor.next_row().await {
                Ok(Some(_)) => rows += 1,
                Ok(None) => panic!("💀 expected the page 1 failure"),
                Err(err) => break err,
            }
        };
        assert_eq!(rows, 100);
        assert_eq!(err.status(), Some(500));
        assert!(cursor.error().is_some());
        assert!(session.last_error().is_some());
        assert_eq!(cursor.next_row().await.expect("finished"), None);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[tokio::test]
    async fn the_one_where_the_stream_yields_every_row() {
        let fake = InMemoryQueryService::new(250);
        let session = session_over(&fake, 100);
        let rows: Vec<Value> = session
            .cursor()
            .await
            .into_stream()
            .map(|row| row.expect("row"))
            .collect()
            .await;
        assert_eq!(rows.len(), 250);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[tokio::test]
    async fn the_one_where_one_split_of_1015_rows_adds_up() {
        let fake = InMemoryQueryService::new(1015);
        let session = session_over(&fake, 100);
        let mut root = session.split_cursor().await;
        assert_eq!(root.estimate_size(), u64::MAX);

        let mut sibling = root.try_split().await.expect("eleven pages split");
        assert_eq!(
            root.range(),
            Some(PageRange { start: 0, current: 0, end: 5, remainder: 0 })
        );
        assert_eq!(
            sibling.range(),
            Some(PageRange { start: 6, current: 6, end: 10, remainder: 15 })
        );
        assert_eq!(root.estimate_size(), 500);
        assert_eq!(sibling.estimate_size(), 415);
        assert_eq!(session.live_consumers().await, 2);

        let mut seen = Vec::new();
        let from_root = drain(&mut root, &mut seen).await;
        assert_eq!(fake.calls().deletes, 0);
        let from_sibling = drain(&mut sibling, &mut seen).await;
        assert_eq!(from_root, 600);
        assert_eq!(from_sibling, 415);
        assert_eq!(from_root + from_sibling, 1015);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[tokio::test]
    async fn the_one_where_splitting_all_the_way_down_loses_nothing() {
        let fake = InMemoryQueryService::new(1015);
        let session = session_over(&fake, 100);
        let mut pending = vec![session.split_cursor().await];
        let mut done = Vec::new();
        while let Some(mut cursor) = pending.pop() {
            match cursor.try_split().await {
                Some(sibling) => {
                    pending.push(cursor);
                    pending.push(sibling);
                }
                None => done.push(cursor),
            }
        }
        assert_eq!(done.len(), 11);

        let mut seen = Vec::new();
        for cursor in &mut done {
            drain(cursor, &mut seen).await;
        }
        let unique: BTreeSet<u64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 1015);
        assert_eq!(unique.len(), 1015);
        assert_eq!(fake.calls().deletes, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_split_interleaved_with_reading_keeps_its_promise() {
        let fake = InMemoryQueryService::new(1015);
        let session = session_over(&fake, 100);
        let mut root = session.split_cursor().await;

        let mut seen = Vec::new();
        for _ in 0..250 {
            assert!(root.try_advance(|row| seen.push(row_number(&row))).await);
        }
        let mut sibling = root.try_split().await.expect("pages 2..=10 remain");
        drain(&mut root, &mut seen).await;
        drain(&mut sibling, &mut seen).await;
        let unique: BTreeSet<u64> = seen.iter().copied().collect();
        assert_eq!(unique.len(), 1015);
        assert_eq!(seen.len(), 1015);
    }

    #[tokio::test]
    async fn the_one_where_a_failed_midpoint_declines_without_damage() {
        let fake = InMemoryQueryService::new(1015).with_failing_page(6);
        let session = session_over(&fake, 100);
        let mut root = session.split_cursor().await;

        assert!(root.try_split().await.is_none());
        assert_eq!(
            root.range(),
            Some(PageRange { start: 0, current: 0, end: 10, remainder: 15 })
        );
        assert_eq!(session.live_consumers().await, 1);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn the_one_where_one_page_cannot_be_halved() {
        let fake = InMemoryQueryService::new(50);
        let session = session_over(&fake, 100);
        let mut root = session.split_cursor().await;
        assert!(root.try_split().await.is_none());
        let mut seen = Vec::new();
        assert_eq!(drain(&mut root, &mut seen).await, 50);
        assert_eq!(root.estimate_size(), 0);
    }

    #[tokio::test]
    async fn the_one_where_unknown_size_means_no_splits_but_all_rows() {
        let fake = InMemoryQueryService::new(250).without_rows_in_job();
        let session = session_over(&fake, 100);
        let mut root = session.split_cursor().await;
        assert!(root.try_split().await.is_none());
        assert_eq!(root.estimate_size(), u64::MAX);
        assert_eq!(session.size().await.expect("ready"), None);
        let mut seen = Vec::new();
        assert_eq!(drain(&mut root, &mut seen).await, 250);
    }

    #[tokio::test]
    async fn the_one_where_a_failed_session_refuses_to_split_or_advance() {
        let fake = InMemoryQueryService::new(10)
            .with_final_state(crate::api::JobState::Cancelled);
        let session = session_over(&fake, 100);
        let mut root = session.split_cursor().await;
        assert!(root.try_split().await.is_none());
        assert!(!root.try_advance(|_| {}).await);
        assert!(matches!(
            root.error().map(QueryError::root),
            Some(QueryError::JobFailed { .. })
        ));
        assert_eq!(root.estimate_size(), u64::MAX);
        assert_eq!(fake.calls().deletes, 1);
    }
}
