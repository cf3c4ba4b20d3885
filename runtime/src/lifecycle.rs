//! Consumer lifecycle: wiring, start and stop.
//!
//! [`EventServiceBuilder`] collects handler registrations during process
//! wiring. The built [`EventService`] exposes the two lifecycle hooks the
//! hosting process calls:
//!
//! - [`EventService::on_start`]: describe the service metrics, connect
//!   producer and consumer, subscribe to the prefixed topics and start the
//!   consume loop
//! - [`EventService::on_stop`]: stop the loop and disconnect both clients
//!
//! Both are no-ops when the message bus is disabled. Connection failures are
//! logged and leave the service running degraded instead of failing the
//! process.

use crate::metrics::describe_metrics;
use crate::producer::ProducerGateway;
use crate::routing::RoutingTable;
use crate::supervisor::Dispatcher;
use futures::StreamExt;
use iam_events_core::config::KafkaConfig;
use iam_events_core::event::EventKind;
use iam_events_core::handler::EventHandler;
use iam_events_core::registry::HandlerRegistry;
use iam_events_core::transport::{InboundStream, MessageConsumer, MessageProducer};
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

/// Builder for [`EventService`].
pub struct EventServiceBuilder {
    config: KafkaConfig,
    producer: Arc<dyn MessageProducer>,
    consumer: Arc<dyn MessageConsumer>,
    registry: HandlerRegistry,
    routes: Option<RoutingTable>,
}

impl EventServiceBuilder {
    /// Start wiring a service over the given transport.
    #[must_use]
    pub fn new(
        config: KafkaConfig,
        producer: Arc<dyn MessageProducer>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> Self {
        Self {
            config,
            producer,
            consumer,
            registry: HandlerRegistry::new(),
            routes: None,
        }
    }

    /// Register `handler` for `kind`.
    ///
    /// Handlers for one kind run in the order they are subscribed.
    #[must_use]
    pub fn subscribe(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.registry.register(kind, handler);
        self
    }

    /// Apply a registration function, e.g. one exported by an integration module.
    #[must_use]
    pub fn with(mut self, register: impl FnOnce(&mut HandlerRegistry)) -> Self {
        register(&mut self.registry);
        self
    }

    /// Replace the routing table derived from configuration.
    #[must_use]
    pub fn routes(mut self, routes: RoutingTable) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Freeze the registry and build the service.
    #[must_use]
    pub fn build(self) -> EventService {
        let routes = self
            .routes
            .unwrap_or_else(|| RoutingTable::from_config(&self.config));
        let gateway = Arc::new(ProducerGateway::new(
            Arc::clone(&self.producer),
            routes,
            self.config.enabled,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(self.registry),
            Arc::clone(&gateway),
            self.config.handler_timeout(),
        ));

        EventService {
            config: self.config,
            producer: self.producer,
            consumer: self.consumer,
            gateway,
            dispatcher,
            running: Mutex::new(None),
        }
    }
}

struct ConsumeLoop {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The event bus as seen by the hosting process.
pub struct EventService {
    config: KafkaConfig,
    producer: Arc<dyn MessageProducer>,
    consumer: Arc<dyn MessageConsumer>,
    gateway: Arc<ProducerGateway>,
    dispatcher: Arc<Dispatcher>,
    running: Mutex<Option<ConsumeLoop>>,
}

impl EventService {
    /// Start wiring a service.
    #[must_use]
    pub fn builder(
        config: KafkaConfig,
        producer: Arc<dyn MessageProducer>,
        consumer: Arc<dyn MessageConsumer>,
    ) -> EventServiceBuilder {
        EventServiceBuilder::new(config, producer, consumer)
    }

    /// Gateway for publishing events.
    #[must_use]
    pub fn gateway(&self) -> Arc<ProducerGateway> {
        Arc::clone(&self.gateway)
    }

    /// The dispatcher fed by the consume loop.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Whether the consume loop is running.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Describe metrics, connect, subscribe and start consuming.
    ///
    /// Calling this on a started service does nothing.
    pub async fn on_start(&self) {
        if !self.config.enabled {
            tracing::info!("Kafka is disabled, not starting event consumer");
            return;
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("Event consumer already started");
            return;
        }

        describe_metrics();

        if let Err(e) = self.producer.connect().await {
            tracing::error!(
                brokers = %self.config.brokers,
                error = %e,
                "Failed to connect Kafka producer"
            );
            return;
        }
        tracing::info!(brokers = %self.config.brokers, "Kafka producer connected");

        if let Err(e) = self.consumer.connect().await {
            tracing::error!(
                brokers = %self.config.brokers,
                error = %e,
                "Failed to connect Kafka consumer"
            );
            return;
        }

        let topics = self.config.subscribed_topics();
        let stream = match self.consumer.subscribe(&topics).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(topics = ?topics, error = %e, "Failed to subscribe to topics");
                return;
            },
        };
        tracing::info!(
            topics = ?topics,
            group_id = %self.config.group_id,
            "Kafka consumer subscribed"
        );

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(consume(stream, Arc::clone(&self.dispatcher), shutdown_rx));
        *running = Some(ConsumeLoop { shutdown, task });
    }

    /// Stop consuming and disconnect.
    ///
    /// Waits for the message currently being dispatched, if any.
    pub async fn on_stop(&self) {
        if !self.config.enabled {
            tracing::info!("Kafka is disabled, nothing to stop");
            return;
        }

        if let Some(running) = self.running.lock().await.take() {
            // The loop may already have ended on its own
            let _ = running.shutdown.send(());
            if let Err(e) = running.task.await {
                tracing::error!(error = %e, "Event consume loop terminated abnormally");
            }
        }

        if let Err(e) = self.consumer.disconnect().await {
            tracing::error!(error = %e, "Failed to disconnect Kafka consumer");
        }
        if let Err(e) = self.producer.disconnect().await {
            tracing::error!(error = %e, "Failed to disconnect Kafka producer");
        }
        tracing::info!("Kafka consumer and producer disconnected");
    }
}

async fn consume(
    mut stream: InboundStream,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                tracing::info!("Event consume loop shutting down");
                break;
            },
            next = stream.next() => match next {
                Some(Ok(message)) => {
                    dispatcher.dispatch(&message).await;
                },
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Error receiving message");
                },
                None => {
                    tracing::warn!("Subscription stream ended");
                    break;
                },
            },
        }
    }
}
