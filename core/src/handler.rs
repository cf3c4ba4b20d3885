//! Event handler abstraction.
//!
//! A handler receives a decoded [`DomainEvent`] plus a [`KeepAlive`] handle and
//! resolves to a [`HandlerResult`]. Three outcomes are meaningful to the
//! dispatcher:
//!
//! - `Ok(HandlerReply::Done)`: success
//! - `Ok(HandlerReply::Failed { .. })`: a business failure the handler reports
//!   explicitly; the message is dead-lettered for replay
//! - `Err(_)` (or a panic): the handler itself is broken; logged, not
//!   dead-lettered
//!
//! # Example
//!
//! ```
//! use iam_events_core::handler::{handler_fn, HandlerReply};
//!
//! let handler = handler_fn(|event, keep_alive| async move {
//!     keep_alive.keep_alive();
//!     if event.routing_key().is_empty() {
//!         return Ok(HandlerReply::failed("event without business key"));
//!     }
//!     Ok(HandlerReply::Done)
//! });
//! # let _ = handler;
//! ```

use crate::event::DomainEvent;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;

/// What a handler reports when it ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerReply {
    /// The event was handled
    Done,
    /// The handler reports a business failure (soft error).
    Failed {
        /// Human-readable rendering of the failure
        error: String,
    },
}

impl HandlerReply {
    /// Build a soft failure from anything displayable.
    #[must_use]
    pub fn failed(error: impl fmt::Display) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    /// Whether this reply is a soft failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of one handler invocation; `Err` is a hard failure.
pub type HandlerResult = Result<HandlerReply, anyhow::Error>;

/// Liveness callback handed to every handler invocation.
///
/// Calling [`KeepAlive::keep_alive`] asks the supervising dispatcher to restart
/// the current timeout window. Handlers that work through many pages of data
/// call it once per page. Clones signal the same invocation.
#[derive(Clone, Default)]
pub struct KeepAlive {
    signal: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl KeepAlive {
    /// Handle bound to a supervisor's notifier.
    #[must_use]
    pub fn new(signal: Arc<Notify>) -> Self {
        Self::from_fn(move || signal.notify_one())
    }

    /// Handle that runs `f` on every signal.
    #[must_use]
    pub fn from_fn(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            signal: Some(Arc::new(f)),
        }
    }

    /// Handle that goes nowhere, for running handlers outside a supervisor.
    #[must_use]
    pub const fn detached() -> Self {
        Self { signal: None }
    }

    /// Signal liveness.
    pub fn keep_alive(&self) {
        if let Some(signal) = &self.signal {
            signal();
        }
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("attached", &self.signal.is_some())
            .finish()
    }
}

/// An event handler registered for one or more event kinds.
///
/// Uses explicit boxed futures so handlers can be stored as
/// `Arc<dyn EventHandler>` in the registry.
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        keep_alive: KeepAlive,
    ) -> BoxFuture<'a, HandlerResult>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Adapter that turns a closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent, KeepAlive) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        event: &'a DomainEvent,
        keep_alive: KeepAlive,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin((self.f)(event.clone(), keep_alive))
    }

    fn name(&self) -> &str {
        "fn-handler"
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(DomainEvent, KeepAlive) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::PersonDeleted;
    use uuid::Uuid;

    #[test]
    fn soft_failure_renders_error() {
        let reply = HandlerReply::failed("quota exceeded");
        assert!(reply.is_failed());
        assert_eq!(
            reply,
            HandlerReply::Failed {
                error: "quota exceeded".to_string()
            }
        );
    }

    #[test]
    fn detached_keep_alive_is_a_no_op() {
        let keep_alive = KeepAlive::detached();
        keep_alive.keep_alive();
        assert_eq!(format!("{keep_alive:?}"), "KeepAlive { attached: false }");
    }

    #[tokio::test]
    async fn keep_alive_wakes_the_notifier() {
        let notify = Arc::new(Notify::new());
        let keep_alive = KeepAlive::new(Arc::clone(&notify));

        keep_alive.clone().keep_alive();

        // notify_one stores a permit when nobody waits yet
        tokio::time::timeout(std::time::Duration::from_millis(50), notify.notified())
            .await
            .unwrap();
    }

    #[test]
    fn from_fn_runs_on_every_signal() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let keep_alive = KeepAlive::from_fn(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        keep_alive.keep_alive();
        keep_alive.clone().keep_alive();

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closure_handlers_receive_the_event() {
        let handler = handler_fn(|event, _keep_alive| async move {
            Ok(HandlerReply::failed(event.routing_key()))
        });
        let person_id = Uuid::new_v4();
        let event = DomainEvent::new(PersonDeleted {
            person_id,
            username: None,
            email: None,
        });

        let reply = handler.handle(&event, KeepAlive::detached()).await.unwrap();
        assert_eq!(reply, HandlerReply::failed(person_id));
    }
}
