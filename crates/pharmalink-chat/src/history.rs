//! Paginated message history.
//!
//! The backend serves pages newest-first; everything downstream of this
//! module sees chronological ascending order only. Failures are soft: the
//! render path gets an empty page, never an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use pharmalink_common::ApiError;

use crate::api::{ChatApi, HistoryPage};
use crate::protocol::ChatMessage;

/// Where the infinite-scroll trigger currently stands. Mutated only by the
/// loader, and only after a successful fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationCursor {
    pub current_page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

type FetchFn =
    Arc<dyn Fn(u32, u32) -> BoxFuture<'static, Result<HistoryPage, ApiError>> + Send + Sync>;

/// Loads history pages and keeps the pagination cursor.
pub struct HistoryLoader {
    fetch: FetchFn,
    page_size: u32,
    cursor: Mutex<PaginationCursor>,
    in_flight: AtomicBool,
}

impl HistoryLoader {
    /// Default page size, matching the dashboard client.
    pub const PAGE_SIZE: u32 = 50;

    pub fn new(api: Arc<ChatApi>, room_id: i64) -> Self {
        Self::with_fetch(move |page, limit| {
            let api = Arc::clone(&api);
            async move { api.fetch_messages(room_id, page, limit).await }.boxed()
        })
    }

    /// Build with a custom fetch function (tests, alternative transports).
    pub fn with_fetch(
        fetch: impl Fn(u32, u32) -> BoxFuture<'static, Result<HistoryPage, ApiError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            fetch: Arc::new(fetch),
            page_size: Self::PAGE_SIZE,
            cursor: Mutex::new(PaginationCursor::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Fetch one page, returning messages oldest-to-newest plus the updated
    /// cursor.
    ///
    /// Returns `None` when a load is already in flight (the second trigger
    /// is suppressed, not queued). A failed fetch yields an empty page with
    /// `has_more = false` and leaves the stored cursor untouched.
    pub async fn load_page(&self, page: u32) -> Option<(Vec<ChatMessage>, PaginationCursor)> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(page, "History load already in flight; suppressed");
            return None;
        }
        let result = (self.fetch)(page, self.page_size).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(fetched) => {
                let mut messages = fetched.messages;
                messages.reverse(); // newest-first on the wire
                let cursor = PaginationCursor {
                    current_page: fetched.current_page,
                    total_pages: fetched.total_pages,
                    has_more: fetched.has_more,
                };
                *self.cursor.lock().expect("cursor lock poisoned") = cursor;
                Some((messages, cursor))
            }
            Err(e) => {
                warn!(page, error = %e, "History fetch failed; returning empty page");
                Some((
                    Vec::new(),
                    PaginationCursor {
                        current_page: page,
                        total_pages: self.cursor().total_pages,
                        has_more: false,
                    },
                ))
            }
        }
    }

    /// Fetch the page after the current cursor, if any remain.
    pub async fn load_older(&self) -> Option<(Vec<ChatMessage>, PaginationCursor)> {
        let cursor = self.cursor();
        if !cursor.has_more {
            return None;
        }
        self.load_page(cursor.current_page + 1).await
    }

    pub fn cursor(&self) -> PaginationCursor {
        *self.cursor.lock().expect("cursor lock poisoned")
    }

    pub fn has_more(&self) -> bool {
        self.cursor().has_more
    }
}
