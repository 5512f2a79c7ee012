//! Listener registry
//!
//! This module provides the notification hook interface and the ordered
//! registry the organization manager notifies after each committed mutation.
//! Listener failures are logged and counted; they never affect the mutation.

use crate::types::OrganizationEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Listener error types.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Listener failed to process the event
    #[error("Listener failed: {0}")]
    Failed(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Notification hook invoked after a hierarchy mutation commits.
///
/// Listeners are called in registration order with the committed event.
/// Returning an error only gets logged.
#[async_trait]
pub trait OrganizationListener: Send + Sync {
    /// Handle a committed mutation.
    async fn on_event(&self, event: &OrganizationEvent) -> ListenerResult<()>;

    /// Topic patterns this listener is interested in.
    ///
    /// Defaults to every organization event.
    fn topics(&self) -> Vec<String> {
        vec!["#".to_string()]
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Events passed to `notify`
    pub events_published: u64,
    /// Successful listener invocations
    pub events_delivered: u64,
    /// Failed listener invocations
    pub listener_failures: u64,
    /// Currently registered listeners
    pub registered_listeners: usize,
}

/// Ordered, possibly empty set of notification hooks.
///
/// # Examples
///
/// ```rust,no_run
/// use orgmgt_events::{BroadcastListener, ListenerRegistry};
/// use std::sync::Arc;
///
/// async fn example() {
///     let registry = ListenerRegistry::new();
///     let listener = Arc::new(BroadcastListener::new(vec!["organization.moved".to_string()]));
///     let mut sub = listener.subscribe();
///
///     let id = registry.register(listener).await;
///     // ... mutations happen ...
///     let event = sub.recv().await.unwrap();
///     registry.unregister(id).await;
/// }
/// ```
#[derive(Default)]
pub struct ListenerRegistry {
    /// Registered listeners in registration order
    listeners: RwLock<Vec<(ListenerId, Arc<dyn OrganizationListener>)>>,
    /// Statistics
    stats: RwLock<RegistryStats>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry").finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener at the end of the notification order.
    pub async fn register(&self, listener: Arc<dyn OrganizationListener>) -> ListenerId {
        let id = ListenerId::new();
        debug!(listener_id = %id, name = listener.name(), "Registering organization listener");

        let count = {
            let mut listeners = self.listeners.write().await;
            listeners.push((id, listener));
            listeners.len()
        };
        self.stats.write().await.registered_listeners = count;
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub async fn unregister(&self, id: ListenerId) -> bool {
        let (removed, count) = {
            let mut listeners = self.listeners.write().await;
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            (listeners.len() != before, listeners.len())
        };
        self.stats.write().await.registered_listeners = count;
        removed
    }

    /// Remove every listener, returning how many were registered.
    pub async fn clear(&self) -> usize {
        let removed = {
            let mut listeners = self.listeners.write().await;
            let count = listeners.len();
            listeners.clear();
            count
        };
        self.stats.write().await.registered_listeners = 0;
        removed
    }

    /// Number of registered listeners.
    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Check if no listener is registered.
    pub async fn is_empty(&self) -> bool {
        self.listeners.read().await.is_empty()
    }

    /// Deliver an event to every listener whose topics match, in order.
    ///
    /// Returns the number of successful deliveries. The listener list is
    /// copied first so listeners may register or unregister while running.
    pub async fn notify(&self, event: &OrganizationEvent) -> usize {
        let topic = event.topic();
        let listeners: Vec<(ListenerId, Arc<dyn OrganizationListener>)> =
            self.listeners.read().await.clone();

        let mut delivered = 0;
        let mut failures = 0;
        for (id, listener) in listeners {
            if !listener
                .topics()
                .iter()
                .any(|pattern| Self::topic_matches(pattern, &topic))
            {
                continue;
            }

            match listener.on_event(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failures += 1;
                    warn!(
                        listener_id = %id,
                        name = listener.name(),
                        org_id = %event.organization_id,
                        topic = %topic,
                        error = %e,
                        "Organization listener failed"
                    );
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.events_published += 1;
        stats.events_delivered += delivered as u64;
        stats.listener_failures += failures;
        delivered
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        self.stats.read().await.clone()
    }

    /// Check if a topic matches a pattern.
    ///
    /// - `*` matches exactly one segment
    /// - `#` matches zero or more segments
    pub fn topic_matches(pattern: &str, topic: &str) -> bool {
        let pattern_parts: Vec<&str> = pattern.split('.').collect();
        let topic_parts: Vec<&str> = topic.split('.').collect();
        Self::segments_match(&pattern_parts, &topic_parts)
    }

    fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                // # absorbs zero or more segments
                (0..=topic.len()).any(|skip| Self::segments_match(&pattern[1..], &topic[skip..]))
            }
            (Some(&"*"), Some(_)) => Self::segments_match(&pattern[1..], &topic[1..]),
            (Some(segment), Some(part)) if segment == part => {
                Self::segments_match(&pattern[1..], &topic[1..])
            }
            _ => false,
        }
    }
}

/// Listener that fans events out to in-process subscribers.
///
/// Each subscriber gets its own receiver; slow subscribers lag rather than
/// block the manager.
pub struct BroadcastListener {
    /// Topic patterns
    topics: Vec<String>,
    /// Event sender
    sender: broadcast::Sender<OrganizationEvent>,
}

impl fmt::Debug for BroadcastListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastListener")
            .field("topics", &self.topics)
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl BroadcastListener {
    /// Create a listener for the given topic patterns.
    pub fn new(topics: Vec<String>) -> Self {
        Self::with_capacity(topics, 1024)
    }

    /// Create with custom channel capacity.
    pub fn with_capacity(topics: Vec<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { topics, sender }
    }

    /// Create a listener for every organization event.
    pub fn all() -> Self {
        Self::new(vec!["#".to_string()])
    }

    /// Open a new subscription.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            id: Uuid::now_v7().to_string(),
            receiver: self.sender.subscribe(),
        }
    }
}

#[async_trait]
impl OrganizationListener for BroadcastListener {
    async fn on_event(&self, event: &OrganizationEvent) -> ListenerResult<()> {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        self.topics.clone()
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

/// Subscription handle for receiving events from a [`BroadcastListener`].
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Event receiver
    pub receiver: broadcast::Receiver<OrganizationEvent>,
}

impl Subscription {
    /// Receive the next event.
    pub async fn recv(&mut self) -> ListenerResult<OrganizationEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|_| ListenerError::ChannelClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
