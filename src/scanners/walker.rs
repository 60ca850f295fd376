//! Generic cursor-pagination driver for vendor collections.
//!
//! Walks a paged endpoint to completion, materializing all items. Vendor
//! volumes are bounded by page size times the page cap, so no lazy
//! streaming is needed.

use std::future::Future;

use super::{Page, ResourceKind, ScannerAdapter, ScannerError};

/// Defensive bound on pages per walk. A vendor that never terminates its
/// cursor chain violates its pagination contract.
pub const MAX_PAGES: u32 = 10_000;

/// Drive a page-fetching function to completion, accumulating all items.
///
/// Starts with no cursor and follows `next_cursor` until the fetcher
/// reports a final page. Fails with `PaginationExhausted` past `MAX_PAGES`.
pub async fn walk<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, ScannerError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ScannerError>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let page = fetch_page(cursor.take()).await?;
        items.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }

    Err(ScannerError::PaginationExhausted(MAX_PAGES))
}

/// Walk a named vendor collection through an adapter's `fetch_page`.
pub async fn walk_resource(
    adapter: &dyn ScannerAdapter,
    resource: ResourceKind,
) -> Result<Vec<serde_json::Value>, ScannerError> {
    walk(|cursor| async move { adapter.fetch_page(resource, cursor.as_deref()).await }).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page<T>(items: Vec<T>, next: Option<&str>) -> Result<Page<T>, ScannerError> {
        Ok(Page {
            items,
            next_cursor: next.map(String::from),
        })
    }

    #[tokio::test]
    async fn accumulates_all_pages() {
        let items = walk(|cursor| async move {
            match cursor.as_deref() {
                None => page(vec![1, 2, 3], Some("a")),
                Some("a") => page(vec![4, 5], Some("b")),
                Some("b") => page(vec![6], None),
                other => panic!("unexpected cursor {other:?}"),
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn terminates_on_first_page_without_cursor() {
        let items = walk(|_| async { page(vec!["only"], None) }).await.unwrap();
        assert_eq!(items, vec!["only"]);
    }

    #[tokio::test]
    async fn empty_collection_yields_empty_vec() {
        let items: Vec<i32> = walk(|_| async { page(vec![], None) }).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn exhaustion_guard_trips_past_page_cap() {
        // Vendor keeps handing back a continuation cursor forever.
        let err = walk(|_| async { page(vec![0u8], Some("again")) })
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::PaginationExhausted(MAX_PAGES)));
    }

    #[tokio::test]
    async fn fetch_error_aborts_walk() {
        let err = walk(|cursor: Option<String>| async move {
            if cursor.is_none() {
                page(vec![1], Some("next"))
            } else {
                Err(ScannerError::Decode("truncated body".into()))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScannerError::Decode(_)));
    }

    mod resource {
        use async_trait::async_trait;
        use serde_json::json;

        use crate::models::scan::{ScanStatus, ScannerKind};
        use crate::scanners::{
            LiveStatus, PhaseKind, PhaseProgress, RawFinding, ScannerAdapter, SubmitParams,
        };

        use super::*;

        /// Two-page adapter serving only `fetch_page`.
        struct PagedStub;

        #[async_trait]
        impl ScannerAdapter for PagedStub {
            fn kind(&self) -> ScannerKind {
                ScannerKind::Sast
            }

            async fn fetch_page(
                &self,
                _resource: ResourceKind,
                cursor: Option<&str>,
            ) -> Result<Page<serde_json::Value>, ScannerError> {
                match cursor {
                    None => Ok(Page {
                        items: vec![json!({"id": 1}), json!({"id": 2})],
                        next_cursor: Some("p2".to_string()),
                    }),
                    Some("p2") => Ok(Page {
                        items: vec![json!({"id": 3})],
                        next_cursor: None,
                    }),
                    other => Err(ScannerError::Decode(format!("unknown cursor {other:?}"))),
                }
            }

            async fn submit_phase(
                &self,
                _target: &str,
                _phase: PhaseKind,
                _params: &SubmitParams,
            ) -> Result<String, ScannerError> {
                Err(ScannerError::Rejected("not used".to_string()))
            }

            async fn poll_phase(&self, _external_id: &str) -> Result<PhaseProgress, ScannerError> {
                Err(ScannerError::Rejected("not used".to_string()))
            }

            async fn fetch_results(
                &self,
                _external_id: &str,
                _target: &str,
            ) -> Result<Vec<RawFinding>, ScannerError> {
                Err(ScannerError::Rejected("not used".to_string()))
            }

            async fn fetch_live_statuses(&self) -> Result<Vec<LiveStatus>, ScannerError> {
                Err(ScannerError::Rejected("not used".to_string()))
            }

            fn map_status(&self, _vendor_status: &str) -> Option<ScanStatus> {
                None
            }
        }

        #[tokio::test]
        async fn walk_resource_materializes_a_collection() {
            let items = walk_resource(&PagedStub, ResourceKind::Projects)
                .await
                .unwrap();
            assert_eq!(items.len(), 3);
            assert_eq!(items[2]["id"], 3);
        }
    }
}
