//! Routing table: event kind → destination topic, dead-letter topic and key.
//!
//! Publishing consults this table for every event. A kind without an entry
//! cannot be published; the gateway logs that and performs no I/O.

use iam_events_core::config::KafkaConfig;
use iam_events_core::event::{DomainEvent, EventKind};
use std::collections::HashMap;
use std::fmt;

/// Extracts the message key from an event.
pub type KeyFn = fn(&DomainEvent) -> String;

/// Where one kind of event goes.
#[derive(Clone)]
pub struct Route {
    /// Fully qualified (prefixed) primary topic
    pub topic: String,
    /// Fully qualified (prefixed) dead-letter topic
    pub dlq_topic: String,
    /// Message key extraction
    pub key: KeyFn,
}

impl Route {
    /// Route keyed by the event's business key.
    #[must_use]
    pub fn new(topic: impl Into<String>, dlq_topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            dlq_topic: dlq_topic.into(),
            key: DomainEvent::routing_key,
        }
    }

    /// Replace the key extraction.
    #[must_use]
    pub fn with_key(mut self, key: KeyFn) -> Self {
        self.key = key;
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("topic", &self.topic)
            .field("dlq_topic", &self.dlq_topic)
            .finish_non_exhaustive()
    }
}

/// Maps event kinds to their [`Route`].
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<EventKind, Route>,
}

impl RoutingTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default routes derived from configuration.
    ///
    /// Person lifecycle events go to the person topic; role and email events
    /// go to the user topic. Dead-letter topics use the configured suffix and
    /// every name carries the topic prefix.
    #[must_use]
    pub fn from_config(config: &KafkaConfig) -> Self {
        let route_to = |topic: &str| {
            Route::new(
                config.prefixed(topic),
                config.prefixed(&config.dlq_topic(topic)),
            )
        };

        let mut table = Self::new();
        for kind in EventKind::ALL {
            let topic = match kind {
                EventKind::PersonCreated | EventKind::PersonRenamed | EventKind::PersonDeleted => {
                    &config.person_topic
                },
                EventKind::RoleUpdated | EventKind::EmailAddressGenerated => &config.user_topic,
            };
            table.insert(kind, route_to(topic));
        }
        table
    }

    /// Add or replace the route for `kind`.
    pub fn insert(&mut self, kind: EventKind, route: Route) -> &mut Self {
        self.routes.insert(kind, route);
        self
    }

    /// Route for `kind`, if mapped.
    #[must_use]
    pub fn route(&self, kind: EventKind) -> Option<&Route> {
        self.routes.get(&kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use iam_events_core::event::PersonDeleted;
    use uuid::Uuid;

    #[test]
    fn default_routes_cover_every_kind() {
        let table = RoutingTable::from_config(&KafkaConfig::default());
        for kind in EventKind::ALL {
            assert!(table.route(kind).is_some(), "{kind} has no route");
        }

        let route = table.route(EventKind::PersonDeleted).unwrap();
        assert_eq!(route.topic, "iam.person");
        assert_eq!(route.dlq_topic, "iam.person-dlq");

        let route = table.route(EventKind::EmailAddressGenerated).unwrap();
        assert_eq!(route.topic, "iam.user");
    }

    #[test]
    fn custom_key_extraction() {
        fn constant(_: &DomainEvent) -> String {
            "fixed".to_string()
        }
        let route = Route::new("t", "t-dlq").with_key(constant);
        let event = DomainEvent::new(PersonDeleted {
            person_id: Uuid::new_v4(),
            username: None,
            email: None,
        });

        assert_eq!((route.key)(&event), "fixed");
        assert_eq!(
            format!("{route:?}"),
            "Route { topic: \"t\", dlq_topic: \"t-dlq\", .. }"
        );
    }
}
