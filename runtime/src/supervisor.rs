//! Dispatch supervisor.
//!
//! One [`Dispatcher::dispatch`] call handles one inbound message:
//!
//! ```text
//! Decoding → Dispatching
//!   → { per handler: Running → Completed | TimedOut | Failed }
//!   → Reconciling → Done
//! ```
//!
//! Handlers run sequentially in registration order. Each invocation is spawned
//! onto its own task and watched by a single-shot deadline that the handler can
//! push back through its [`KeepAlive`] handle. When the deadline fires the
//! supervisor stops waiting and moves on; the task itself is left to finish on
//! its own since its side effects are already in flight.
//!
//! Nothing is ever propagated back to the broker loop: decode errors, handler
//! errors, panics and timeouts are all logged and reported in the returned
//! [`DispatchReport`].

use crate::metrics::{
    EVENTS_DISPATCHED, EVENTS_UNDECODABLE, HANDLER_DURATION, HANDLER_OUTCOMES, counter, histogram,
};
use crate::producer::{ProducerGateway, PublishStatus};
use iam_events_core::envelope::{DecodeError, TransportEnvelope, decode};
use iam_events_core::event::{DomainEvent, EventKind};
use iam_events_core::handler::{EventHandler, HandlerReply, KeepAlive};
use iam_events_core::registry::HandlerRegistry;
use iam_events_core::transport::InboundMessage;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// How one handler invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler returned [`HandlerReply::Done`]
    Completed,
    /// The handler returned [`HandlerReply::Failed`]; the message was dead-lettered
    SoftFailed {
        /// Rendered failure, as written to the `error` header
        error: String,
        /// Result of the dead-letter publish
        dead_letter: PublishStatus,
    },
    /// The handler returned an error or panicked
    Failed {
        /// Rendered error or panic message
        error: String,
    },
    /// The handler did not settle within its timeout window
    TimedOut,
}

impl HandlerOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::SoftFailed { .. } => "soft_failed",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Observable result of dispatching one message.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Kind of the decoded event
    pub event_kind: Option<EventKind>,
    /// Id of the decoded event
    pub event_id: Option<Uuid>,
    /// Why the message could not be decoded
    pub decode_error: Option<DecodeError>,
    /// One outcome per registered handler, in registration order
    pub outcomes: Vec<HandlerOutcome>,
    /// Number of successful dead-letter publishes
    pub dead_lettered: usize,
}

impl DispatchReport {
    /// Whether the message decoded and every handler completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.decode_error.is_none()
            && self
                .outcomes
                .iter()
                .all(|outcome| matches!(outcome, HandlerOutcome::Completed))
    }
}

/// Decodes inbound messages and runs their handlers under timeout supervision.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    gateway: Arc<ProducerGateway>,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// The registry is read-only from here on.
    #[must_use]
    pub const fn new(
        registry: Arc<HandlerRegistry>,
        gateway: Arc<ProducerGateway>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            handler_timeout,
        }
    }

    /// The timeout window given to each handler invocation.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// The handler registry.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Dispatch a message received from the broker.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let span = tracing::info_span!(
            "dispatch",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset
        );
        let envelope = message.to_envelope();
        self.dispatch_envelope(&envelope).instrument(span).await
    }

    /// Decode `envelope` and dispatch the event.
    ///
    /// A soft handler failure forwards this envelope, unchanged apart from the
    /// added `error` header, to the dead-letter topic.
    pub async fn dispatch_envelope(&self, envelope: &TransportEnvelope) -> DispatchReport {
        counter!(EVENTS_DISPATCHED).increment(1);
        match decode(envelope) {
            Ok(event) => self.run(&event, Some(envelope)).await,
            Err(error) => {
                Self::log_decode_error(envelope, &error);
                counter!(EVENTS_UNDECODABLE, "reason" => error.label()).increment(1);
                DispatchReport {
                    decode_error: Some(error),
                    ..DispatchReport::default()
                }
            },
        }
    }

    /// Dispatch an already decoded event.
    ///
    /// Soft failures are dead-lettered by re-encoding the event.
    pub async fn dispatch_event(&self, event: &DomainEvent) -> DispatchReport {
        counter!(EVENTS_DISPATCHED).increment(1);
        self.run(event, None).await
    }

    async fn run(
        &self,
        event: &DomainEvent,
        original: Option<&TransportEnvelope>,
    ) -> DispatchReport {
        let kind = event.kind();
        let handlers = self.registry.lookup(kind);
        tracing::info!(
            event_type = %kind,
            event_id = %event.event_id(),
            handlers = handlers.len(),
            "Handling event: {kind} with {} handlers",
            handlers.len()
        );

        let mut report = DispatchReport {
            event_kind: Some(kind),
            event_id: Some(event.event_id()),
            ..DispatchReport::default()
        };

        for (index, handler) in handlers.iter().enumerate() {
            let span = tracing::debug_span!(
                "handler",
                handler_index = index,
                handler = handler.name()
            );
            let outcome = async {
                match self.supervise(Arc::clone(handler), event).await {
                    HandlerOutcome::SoftFailed { error, .. } => {
                        let dead_letter = match original {
                            Some(envelope) => {
                                self.gateway.dead_letter(event, envelope, &error).await
                            },
                            None => self.gateway.publish_to_dlq(event, &error).await,
                        };
                        HandlerOutcome::SoftFailed { error, dead_letter }
                    },
                    outcome => outcome,
                }
            }
            .instrument(span)
            .await;

            if matches!(
                &outcome,
                HandlerOutcome::SoftFailed { dead_letter, .. } if dead_letter.is_sent()
            ) {
                report.dead_lettered += 1;
            }
            report.outcomes.push(outcome);
        }

        report
    }

    /// Run one handler for `event` under timeout supervision.
    ///
    /// Logs the outcome. A soft failure is reported with
    /// [`PublishStatus::Disabled`] as its dead-letter status; routing it to the
    /// dead-letter topic is up to the caller.
    pub async fn supervise(
        &self,
        handler: Arc<dyn EventHandler>,
        event: &DomainEvent,
    ) -> HandlerOutcome {
        let kind = event.kind();
        let event_id = event.event_id();
        let timeout = self.handler_timeout;
        let started = Instant::now();

        let signal = Arc::new(Notify::new());
        let keep_alive = KeepAlive::new(Arc::clone(&signal));
        let owned = event.clone();
        let mut task = tokio::spawn(
            async move { handler.handle(&owned, keep_alive).await }.in_current_span(),
        );

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;

                joined = &mut task => break Self::settle(kind, event_id, joined),
                () = signal.notified() => {
                    tracing::info!(
                        event_type = %kind,
                        event_id = %event_id,
                        "Handler for event {kind} is still running and called keepAlive, \
                         resetting timeout"
                    );
                    deadline.as_mut().reset(Instant::now() + timeout);
                },
                () = &mut deadline => {
                    tracing::error!(
                        critical = true,
                        event_type = %kind,
                        event_id = %event_id,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Handler for event {kind} with EventID: {event_id} timed out"
                    );
                    break HandlerOutcome::TimedOut;
                },
            }
        };

        histogram!(HANDLER_DURATION).record(started.elapsed().as_secs_f64());
        counter!(HANDLER_OUTCOMES, "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn settle(
        kind: EventKind,
        event_id: Uuid,
        joined: Result<Result<HandlerReply, anyhow::Error>, JoinError>,
    ) -> HandlerOutcome {
        let error = match joined {
            Ok(Ok(HandlerReply::Done)) => {
                tracing::info!(
                    event_type = %kind,
                    event_id = %event_id,
                    "Handler for event {kind} with EventID: {event_id} completed successfully"
                );
                return HandlerOutcome::Completed;
            },
            Ok(Ok(HandlerReply::Failed { error })) => {
                tracing::error!(
                    event_type = %kind,
                    event_id = %event_id,
                    error = %error,
                    "Handler for event {kind} with EventID: {event_id} reported a failure, \
                     sending to DLQ"
                );
                return HandlerOutcome::SoftFailed {
                    error,
                    dead_letter: PublishStatus::Disabled,
                };
            },
            Ok(Err(error)) => format!("{error:#}"),
            Err(join_error) if join_error.is_panic() => {
                format!("handler panicked: {}", panic_message(join_error.into_panic().as_ref()))
            },
            Err(join_error) => join_error.to_string(),
        };

        tracing::error!(
            event_type = %kind,
            event_id = %event_id,
            error = %error,
            "Error handling event {kind} with EventID: {event_id}"
        );
        HandlerOutcome::Failed { error }
    }

    fn log_decode_error(envelope: &TransportEnvelope, error: &DecodeError) {
        let event_key = envelope.event_key().unwrap_or("<none>");
        match error {
            DecodeError::MalformedJson(source) => tracing::error!(
                event_key = %event_key,
                decode_error = error.label(),
                error = %source,
                "Unknown error while decoding message with eventKey {event_key}"
            ),
            _ => tracing::error!(
                event_key = %event_key,
                decode_error = error.label(),
                error = %error,
                "Dropping undecodable message with eventKey {event_key}"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(HandlerOutcome::Completed.label(), "completed");
        assert_eq!(HandlerOutcome::TimedOut.label(), "timed_out");
        assert_eq!(
            HandlerOutcome::Failed {
                error: "boom".to_string()
            }
            .label(),
            "failed"
        );
    }

    #[test]
    fn panic_payloads_render() {
        let borrowed: Box<dyn Any + Send> = Box::new("static message");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(borrowed.as_ref()), "static message");
        assert_eq!(panic_message(owned.as_ref()), "owned message");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn empty_report_is_clean() {
        assert!(DispatchReport::default().is_clean());
        let report = DispatchReport {
            outcomes: vec![HandlerOutcome::Completed, HandlerOutcome::TimedOut],
            ..DispatchReport::default()
        };
        assert!(!report.is_clean());
    }
}
