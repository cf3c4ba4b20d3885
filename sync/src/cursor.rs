//! Cursor batch synchronizer.
//!
//! Pushes a large, cursor-paginated data set to a slow external system one
//! page at a time. A page is fetched, translated into the external batch
//! request, sent as a single mass action and reconciled item by item before
//! the cursor advances. One bad record never aborts the run: refused items are
//! collected as [`ItemFailure`]s, and a batch call that fails as a whole marks
//! every item of its page as failed with that one error.
//!
//! The handler's [`KeepAlive`] is signalled once per page so long runs stay
//! within the dispatcher's timeout window.
//!
//! Pagination is forward-only and best-effort. Records inserted or deleted
//! behind the cursor while a run is in progress may be skipped or seen twice.

use crate::error::{GatewayError, SyncError};
use crate::mass_action::{ItemStatus, MassActionResult};
use futures::future::BoxFuture;
use iam_events_core::handler::KeepAlive;

/// Position and size of the next page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items in the page
    pub page_size: usize,
    /// Opaque cursor returned with the previous page; `None` = start
    pub cursor: Option<String>,
}

impl PageRequest {
    /// The first page.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self {
            page_size,
            cursor: None,
        }
    }

    /// Continue at `cursor`.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// One page of items and the cursor of the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items of this page, at most the requested page size
    pub items: Vec<T>,
    /// Opaque cursor of the next page
    pub next_cursor: Option<String>,
    /// Whether more items follow this page
    pub has_more: bool,
}

impl<T> Page<T> {
    /// A page with no successor.
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_more: false,
        }
    }

    /// An exhausted data set.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Mark that more items follow at `cursor`.
    #[must_use]
    pub fn with_next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self.has_more = true;
        self
    }

    /// Number of items in this page.
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Request for the page after this one, if any.
    ///
    /// A page that claims more items but carries no cursor ends the walk.
    #[must_use]
    pub fn next_request(&self, page_size: usize) -> Option<PageRequest> {
        match (&self.next_cursor, self.has_more) {
            (Some(cursor), true) => Some(PageRequest::new(page_size).with_cursor(cursor.clone())),
            _ => None,
        }
    }
}

/// A cursor-paginated data set, e.g. "all persons holding role R".
pub trait PageSource<T>: Send + Sync {
    /// Fetch the page described by `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the backing store cannot be read.
    fn fetch<'a>(
        &'a self,
        request: &'a PageRequest,
    ) -> BoxFuture<'a, Result<Page<T>, GatewayError>>;
}

/// The external side of a synchronization: batch translation and the mass
/// action call.
pub trait MassActionSink<T>: Send + Sync {
    /// Batch request in the external system's shape.
    type Request: Send;
    /// Call-level payload of the response.
    type Value: Send;

    /// Translate one page of items into a batch request.
    fn translate(&self, items: &[T]) -> Self::Request;

    /// Send one batch request.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the call fails as a whole, after the
    /// gateway's own retries.
    fn send(
        &self,
        request: Self::Request,
    ) -> BoxFuture<'_, Result<MassActionResult<Self::Value>, GatewayError>>;
}

/// An item the external system refused, or that was part of a failed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure<T> {
    /// Rendered failure
    pub reason: String,
    /// The item itself
    pub item: T,
}

/// Summary of a completed synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun<T> {
    /// Pages fetched
    pub pages: usize,
    /// Items fetched across all pages
    pub items: usize,
    /// Batches whose call failed as a whole
    pub failed_batches: usize,
    /// Every failed item, in fetch order
    pub failures: Vec<ItemFailure<T>>,
}

impl<T> Default for SyncRun<T> {
    fn default() -> Self {
        Self {
            pages: 0,
            items: 0,
            failed_batches: 0,
            failures: Vec::new(),
        }
    }
}

impl<T> SyncRun<T> {
    /// Items that were not reported as failed.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.items.saturating_sub(self.failures.len())
    }
}

/// Runs cursor-paginated mass action synchronizations.
#[derive(Debug, Clone, Copy)]
pub struct CursorSynchronizer {
    max_batch_size: usize,
}

impl CursorSynchronizer {
    /// Synchronizer fetching at most `max_batch_size` items per page.
    #[must_use]
    pub const fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Page size.
    #[must_use]
    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Run one synchronization from the start of `source` to its end.
    ///
    /// Pages are processed strictly in order; the cursor only advances after
    /// the page's batch has been reconciled.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Fetch`] if a page cannot be fetched. Failed
    /// batches and refused items are not errors; they are reported in
    /// [`SyncRun::failures`].
    pub async fn run<T, Src, Snk>(
        &self,
        source: &Src,
        sink: &Snk,
        keep_alive: &KeepAlive,
    ) -> Result<SyncRun<T>, SyncError>
    where
        Src: PageSource<T> + ?Sized,
        Snk: MassActionSink<T> + ?Sized,
    {
        let mut run = SyncRun::default();
        let mut request = PageRequest::new(self.max_batch_size);

        loop {
            let page = source
                .fetch(&request)
                .await
                .map_err(|source| SyncError::Fetch {
                    cursor: request.cursor.clone(),
                    source,
                })?;
            run.pages += 1;
            run.items += page.count();
            let next = page.next_request(self.max_batch_size);

            if !page.items.is_empty() {
                let request = sink.translate(&page.items);
                match sink.send(request).await {
                    Ok(result) => {
                        reconcile(page.items, &result.status, &mut run.failures);
                    },
                    Err(error) => {
                        tracing::warn!(
                            page = run.pages,
                            items = page.items.len(),
                            error = %error,
                            "Mass action failed, marking the whole page as failed"
                        );
                        run.failed_batches += 1;
                        let reason = error.to_string();
                        run.failures
                            .extend(page.items.into_iter().map(|item| ItemFailure {
                                reason: reason.clone(),
                                item,
                            }));
                    },
                }
            }

            keep_alive.keep_alive();

            match next {
                Some(next) => request = next,
                None => break,
            }
        }

        tracing::debug!(
            pages = run.pages,
            items = run.items,
            failures = run.failures.len(),
            "Synchronization run finished"
        );
        Ok(run)
    }
}

/// Zip statuses with items; items without a failure status succeeded.
fn reconcile<T>(items: Vec<T>, status: &[ItemStatus], failures: &mut Vec<ItemFailure<T>>) {
    if status.len() != items.len() {
        tracing::warn!(
            items = items.len(),
            statuses = status.len(),
            "Mass action returned a status list of unexpected length"
        );
    }
    for (index, item) in items.into_iter().enumerate() {
        if let Some(reason) = status.get(index).and_then(ItemStatus::failure_description) {
            failures.push(ItemFailure {
                reason: reason.to_string(),
                item,
            });
        }
    }
}
